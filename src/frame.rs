//! 프레임 (와이어 상 최소 단위)
//!
//! ```text
//! offset  field          size
//! 0       SOF            1
//! 1       frame_type     1
//! 2       datagram_id    4   (LE)
//! 6       sequence_num   1
//! 7       payload_len    2   (LE)
//! 9       payload        payload_len
//! 9+n     crc32          4   (LE, payload 만 대상)
//! 13+n    EOF            1
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::checksum::ChecksumEngine;
use crate::config::FrameLimits;
use crate::error::{ConstructionError, Error, ParseError, Result};
use crate::{EOF, FRAME_OVERHEAD, SOF};

/// payload_len 필드 끝 오프셋
pub(crate) const PREAMBLE_LEN: usize = 9;

/// 프레임 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// 데이터그램 헤더/제어 프레임
    Header,

    /// 펌웨어 데이터
    Data,

    /// 애플리케이션으로 점프 요청
    JumpToApplication,

    /// 노드 측 응답
    Acknowledgement,

    /// 노드 측 에러 보고
    Error,

    /// 부트로더로 점프 요청
    JumpToBootloader,

    /// ping 메타데이터 (명령, 길이, CRC)
    PingMetadata,

    /// ping 데이터
    PingData,

    /// 예약된 값
    Reserved(u8),
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0 => FrameType::Header,
            1 => FrameType::Data,
            2 => FrameType::JumpToApplication,
            3 => FrameType::Acknowledgement,
            4 => FrameType::Error,
            5 => FrameType::JumpToBootloader,
            6 => FrameType::PingMetadata,
            7 => FrameType::PingData,
            other => FrameType::Reserved(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        match value {
            FrameType::Header => 0,
            FrameType::Data => 1,
            FrameType::JumpToApplication => 2,
            FrameType::Acknowledgement => 3,
            FrameType::Error => 4,
            FrameType::JumpToBootloader => 5,
            FrameType::PingMetadata => 6,
            FrameType::PingData => 7,
            FrameType::Reserved(other) => other,
        }
    }
}

/// 프레임 (생성 시 검증, 이후 불변)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    datagram_id: u32,
    sequence_num: u8,
    payload: Bytes,
    crc32: u32,
}

impl Frame {
    /// 새 프레임 생성
    ///
    /// sequence_num 과 payload 크기를 한도 내로 검증한 뒤 payload CRC 를 계산한다.
    pub fn new(
        frame_type: FrameType,
        datagram_id: u32,
        sequence_num: u32,
        payload: Bytes,
        limits: &FrameLimits,
        engine: &ChecksumEngine,
    ) -> std::result::Result<Self, ConstructionError> {
        let max_seq = limits.sequence_width.max();
        if sequence_num > max_seq as u32 {
            return Err(ConstructionError::SequenceOutOfRange {
                sequence_num,
                max: max_seq,
            });
        }

        let max_payload = limits.max_payload_size.min(u16::MAX as usize);
        if payload.len() > max_payload {
            return Err(ConstructionError::PayloadTooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }

        let crc32 = engine.checksum(&payload);

        Ok(Self {
            frame_type,
            datagram_id,
            sequence_num: sequence_num as u8,
            payload,
            crc32,
        })
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn datagram_id(&self) -> u32 {
        self.datagram_id
    }

    pub fn sequence_num(&self) -> u8 {
        self.sequence_num
    }

    pub fn payload_len(&self) -> u16 {
        self.payload.len() as u16
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// 와이어 상 크기
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// 바이트로 직렬화
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(SOF);
        buf.put_u8(self.frame_type.into());
        buf.put_u32_le(self.datagram_id);
        buf.put_u8(self.sequence_num);
        buf.put_u16_le(self.payload_len());
        buf.put_slice(&self.payload);
        buf.put_u32_le(self.crc32);
        buf.put_u8(EOF);
        buf.freeze()
    }

    /// 바이트에서 역직렬화
    ///
    /// 형식 오류는 `Error::Parse`, payload CRC 불일치는 `Error::ChecksumMismatch` 로 구분한다.
    /// 프레임 뒤에 남는 바이트는 무시한다.
    pub fn unpack(bytes: &[u8], limits: &FrameLimits, engine: &ChecksumEngine) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(ParseError::ShortBuffer {
                expected: FRAME_OVERHEAD,
                got: bytes.len(),
            }
            .into());
        }

        let mut cursor = bytes;
        let sof = cursor.get_u8();
        if sof != SOF {
            return Err(ParseError::BadSof(sof).into());
        }

        let frame_type = FrameType::from(cursor.get_u8());
        let datagram_id = cursor.get_u32_le();
        let sequence_num = cursor.get_u8();
        let payload_len = cursor.get_u16_le() as usize;

        let max_seq = limits.sequence_width.max();
        if sequence_num > max_seq {
            return Err(ParseError::FieldOutOfRange {
                field: "sequence_num",
                value: sequence_num as usize,
                max: max_seq as usize,
            }
            .into());
        }

        let max_payload = limits.max_payload_size.min(u16::MAX as usize);
        if payload_len > max_payload {
            return Err(ParseError::FieldOutOfRange {
                field: "payload_len",
                value: payload_len,
                max: max_payload,
            }
            .into());
        }

        let needed = FRAME_OVERHEAD + payload_len;
        if bytes.len() < needed {
            return Err(ParseError::ShortBuffer {
                expected: needed,
                got: bytes.len(),
            }
            .into());
        }

        let payload = Bytes::copy_from_slice(&cursor[..payload_len]);
        cursor.advance(payload_len);
        let crc32 = cursor.get_u32_le();
        let eof = cursor.get_u8();
        if eof != EOF {
            return Err(ParseError::BadEof(eof).into());
        }

        let computed = engine.checksum(&payload);
        if computed != crc32 {
            return Err(Error::ChecksumMismatch {
                expected: crc32,
                got: computed,
            });
        }

        Ok(Self {
            frame_type,
            datagram_id,
            sequence_num,
            payload,
            crc32,
        })
    }

    /// payload CRC 재검증
    pub fn verify_crc(&self, engine: &ChecksumEngine) -> bool {
        engine.checksum(&self.payload) == self.crc32
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame(type={:?}, datagram_id={:#010X}, seq={}, len={}, crc32={:#010X})",
            self.frame_type,
            self.datagram_id,
            self.sequence_num,
            self.payload.len(),
            self.crc32
        )
    }
}
