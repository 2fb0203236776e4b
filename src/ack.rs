//! 노드 응답 (ACK/NACK) 레코드
//!
//! 고정 262 bytes: ack_status(1) + response_to_type(1) + error_code(4, LE) + error_message(256, null padding)

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ParseError;
use crate::{ACK_RECORD_SIZE, ERROR_MESSAGE_LEN};

/// 응답 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ack,
    Nack,
    /// 0/1 이외의 값, 실패로 취급
    Unknown(u8),
}

impl From<u8> for AckStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => AckStatus::Ack,
            1 => AckStatus::Nack,
            other => AckStatus::Unknown(other),
        }
    }
}

impl From<AckStatus> for u8 {
    fn from(value: AckStatus) -> Self {
        match value {
            AckStatus::Ack => 0,
            AckStatus::Nack => 1,
            AckStatus::Unknown(other) => other,
        }
    }
}

/// 노드 측 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorCode {
    Success,
    ResourceExhausted,
    InvalidArgs,
    InternalError,
    Timeout,
    Crc32Mismatch,
    Crc32DataNotAligned,
    FlashWriteFailed,
    FlashWriteOutOfBounds,
    FlashWriteNotAligned,
    FlashReadFailed,
    FlashErase,
    FlashVerificationFailed,
    InvalidPacket,
    BootloaderSuccess,
    BootloaderInvalidState,
    BootloaderUninitialized,
    BootloaderInvalidDatagram,
    BootloaderWriteInProgress,
    BootloaderFailure,
    NoMemory,
    NoDatagramFound,
    JumpFailed,
    Other(u32),
}

impl From<u32> for NodeErrorCode {
    fn from(value: u32) -> Self {
        use NodeErrorCode::*;
        match value {
            0 => Success,
            1 => ResourceExhausted,
            2 => InvalidArgs,
            3 => InternalError,
            4 => Timeout,
            5 => Crc32Mismatch,
            6 => Crc32DataNotAligned,
            7 => FlashWriteFailed,
            8 => FlashWriteOutOfBounds,
            9 => FlashWriteNotAligned,
            10 => FlashReadFailed,
            11 => FlashErase,
            12 => FlashVerificationFailed,
            13 => InvalidPacket,
            14 => BootloaderSuccess,
            15 => BootloaderInvalidState,
            16 => BootloaderUninitialized,
            17 => BootloaderInvalidDatagram,
            18 => BootloaderWriteInProgress,
            19 => BootloaderFailure,
            20 => NoMemory,
            21 => NoDatagramFound,
            22 => JumpFailed,
            other => Other(other),
        }
    }
}

impl NodeErrorCode {
    /// 전송 중 데이터 손상을 의미하는 코드
    pub fn is_checksum_failure(self) -> bool {
        matches!(self, NodeErrorCode::Crc32Mismatch | NodeErrorCode::Crc32DataNotAligned)
    }
}

/// ACK 레코드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    status: AckStatus,
    response_to_type: u8,
    error_code: u32,
    /// 뒤쪽 null padding 을 뗀 원본 바이트
    error_message: Bytes,
}

impl Ack {
    /// 새 응답 생성 (노드 시뮬레이터용)
    ///
    /// error_message 는 256 bytes 를 넘으면 잘린다.
    pub fn new(status: AckStatus, response_to_type: u8, error_code: u32, error_message: impl Into<Bytes>) -> Self {
        let mut error_message = error_message.into();
        error_message.truncate(ERROR_MESSAGE_LEN);

        Self {
            status,
            response_to_type,
            error_code,
            error_message,
        }
    }

    /// 성공 응답
    pub fn ack(response_to_type: u8) -> Self {
        Self::new(AckStatus::Ack, response_to_type, 0, Bytes::new())
    }

    /// 실패 응답
    pub fn nack(response_to_type: u8, error_code: u32, error_message: impl Into<Bytes>) -> Self {
        Self::new(AckStatus::Nack, response_to_type, error_code, error_message)
    }

    /// 바이트에서 파싱
    ///
    /// 레코드 크기보다 짧으면 실패, 뒤에 남는 바이트는 무시
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < ACK_RECORD_SIZE {
            return Err(ParseError::ShortBuffer {
                expected: ACK_RECORD_SIZE,
                got: bytes.len(),
            });
        }

        let mut cursor = &bytes[..ACK_RECORD_SIZE];
        let status = AckStatus::from(cursor.get_u8());
        let response_to_type = cursor.get_u8();
        let error_code = cursor.get_u32_le();

        let raw = &cursor[..ERROR_MESSAGE_LEN];
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
        let error_message = Bytes::copy_from_slice(&raw[..end]);

        Ok(Self {
            status,
            response_to_type,
            error_code,
            error_message,
        })
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACK_RECORD_SIZE);
        buf.put_u8(self.status.into());
        buf.put_u8(self.response_to_type);
        buf.put_u32_le(self.error_code);
        buf.put_slice(&self.error_message);
        buf.put_bytes(0, ERROR_MESSAGE_LEN - self.error_message.len());
        buf.freeze()
    }

    pub fn status(&self) -> AckStatus {
        self.status
    }

    pub fn ack_status(&self) -> u8 {
        self.status.into()
    }

    pub fn response_to_type(&self) -> u8 {
        self.response_to_type
    }

    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    pub fn node_error(&self) -> NodeErrorCode {
        NodeErrorCode::from(self.error_code)
    }

    /// 메시지를 문자열로 (UTF-8 이 아닌 바이트는 U+FFFD 로 대체)
    pub fn error_message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.error_message)
    }

    /// 노드가 보낸 메시지 원본 바이트
    pub fn error_message_bytes(&self) -> &Bytes {
        &self.error_message
    }

    /// ack_status == 0
    pub fn is_ack(&self) -> bool {
        self.status == AckStatus::Ack
    }
}
