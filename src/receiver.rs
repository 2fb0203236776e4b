//! 수신측 (노드 또는 노드 시뮬레이터)
//!
//! - 바이트 스트림에서 프레임 경계 복원
//! - 헤더 기준 데이터그램 조립 및 검증

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::checksum::ChecksumEngine;
use crate::config::{Config, FrameLimits};
use crate::datagram::DatagramHeader;
use crate::error::{Error, ParseError, Result};
use crate::frame::{Frame, FrameType, PREAMBLE_LEN};
use crate::{EOF, FRAME_OVERHEAD, SOF};

/// 스트림 프레임 디코더
///
/// SOF 로 시작하고 선언된 길이 위치에 EOF 가 있는 구간만 프레임으로 본다.
/// 조건이 맞지 않으면 1 byte 씩 밀어 다음 SOF 를 찾는다.
pub struct FrameDecoder {
    buf: BytesMut,
    limits: FrameLimits,
    engine: ChecksumEngine,
}

impl FrameDecoder {
    pub fn new(limits: FrameLimits, engine: ChecksumEngine) -> Self {
        Self {
            buf: BytesMut::with_capacity(FRAME_OVERHEAD + limits.max_payload_size),
            limits,
            engine,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.frame_limits(), ChecksumEngine::new(config.polynomial))
    }

    /// 수신 바이트 추가
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 아직 프레임으로 소비되지 않은 바이트 수
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 다음 프레임 추출
    ///
    /// 데이터가 더 필요하면 `None`. payload CRC 가 틀린 프레임은 소비한 뒤 에러로 돌려준다.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.buf.iter().position(|&b| b == SOF) {
                Some(0) => {}
                Some(pos) => {
                    debug!("SOF 이전 {} bytes 폐기", pos);
                    self.buf.advance(pos);
                }
                None => {
                    if !self.buf.is_empty() {
                        debug!("SOF 없음, {} bytes 폐기", self.buf.len());
                        self.buf.clear();
                    }
                    return None;
                }
            }

            if self.buf.len() < PREAMBLE_LEN {
                return None;
            }

            let payload_len = u16::from_le_bytes([self.buf[7], self.buf[8]]) as usize;
            if payload_len > self.limits.max_payload_size {
                debug!("payload_len {} 한도 초과, 재동기화", payload_len);
                self.buf.advance(1);
                continue;
            }

            let needed = FRAME_OVERHEAD + payload_len;
            if self.buf.len() < needed {
                return None;
            }

            if self.buf[needed - 1] != EOF {
                debug!("EOF 위치 불일치 ({:#04X}), 재동기화", self.buf[needed - 1]);
                self.buf.advance(1);
                continue;
            }

            let raw = self.buf.split_to(needed);
            return Some(Frame::unpack(&raw, &self.limits, &self.engine));
        }
    }
}

/// 데이터그램 조립기
///
/// 같은 sequence_num 이 다시 오면 (ACK 유실 후 재전송) 무시한다.
pub struct DatagramAssembler {
    header: DatagramHeader,
    slots: Vec<Option<Bytes>>,
    received: u16,
    engine: ChecksumEngine,
}

impl DatagramAssembler {
    /// 헤더 프레임으로 조립 시작
    pub fn new(header_frame: &Frame, engine: ChecksumEngine) -> Result<Self> {
        if header_frame.frame_type() != FrameType::Header || header_frame.sequence_num() != 0 {
            return Err(ParseError::NotAHeader(
                header_frame.frame_type().into(),
                header_frame.sequence_num(),
            )
            .into());
        }

        let header = DatagramHeader::decode(header_frame.payload(), &engine)?;
        if header.datagram_id() != header_frame.datagram_id() {
            return Err(Error::UnexpectedDatagram {
                expected: header_frame.datagram_id(),
                got: header.datagram_id(),
            });
        }

        debug!(
            "데이터그램 {} 조립 시작: node={}, {} 패킷, {} bytes",
            header.datagram_id(),
            header.target_node(),
            header.num_packets(),
            header.total_length()
        );

        Ok(Self {
            slots: vec![None; header.num_packets() as usize],
            header,
            received: 0,
            engine,
        })
    }

    pub fn header(&self) -> &DatagramHeader {
        &self.header
    }

    /// payload 프레임 삽입, 새로 채워졌으면 true
    pub fn insert(&mut self, frame: &Frame) -> Result<bool> {
        if frame.datagram_id() != self.header.datagram_id() {
            return Err(Error::UnexpectedDatagram {
                expected: self.header.datagram_id(),
                got: frame.datagram_id(),
            });
        }

        let seq = frame.sequence_num();
        let num_packets = self.header.num_packets();
        if seq == 0 || seq as u16 > num_packets {
            return Err(Error::UnexpectedSequence {
                sequence_num: seq,
                num_packets,
            });
        }

        let slot = &mut self.slots[seq as usize - 1];
        if slot.is_some() {
            return Ok(false);
        }

        *slot = Some(frame.payload().clone());
        self.received += 1;
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.header.num_packets()
    }

    /// 아직 받지 못한 sequence_num 목록
    pub fn missing(&self) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| (idx + 1) as u8)
            .collect()
    }

    /// 조립 완료, total_length 와 datagram_crc32 검증
    pub fn finish(self) -> Result<Bytes> {
        if !self.is_complete() {
            return Err(Error::Incomplete {
                received: self.received,
                expected: self.header.num_packets(),
            });
        }

        let mut data = BytesMut::with_capacity(self.header.total_length() as usize);
        for payload in self.slots.iter().flatten() {
            data.extend_from_slice(payload);
        }

        if data.len() as u64 != self.header.total_length() as u64 {
            return Err(Error::LengthMismatch {
                expected: self.header.total_length(),
                got: data.len() as u32,
            });
        }

        let crc = self.engine.checksum(&data);
        if crc != self.header.datagram_crc32() {
            return Err(Error::ChecksumMismatch {
                expected: self.header.datagram_crc32(),
                got: crc,
            });
        }

        debug!("데이터그램 {} 조립 완료: {} bytes", self.header.datagram_id(), data.len());
        Ok(data.freeze())
    }
}
