//! 에러 타입 정의

use std::fmt;

use thiserror::Error;

/// 프레임/데이터그램 생성 단계 에러 (재시도 대상 아님)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("sequence_num {sequence_num} 범위 초과 (최대 {max})")]
    SequenceOutOfRange { sequence_num: u32, max: u8 },

    #[error("payload 크기 초과: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("데이터그램 패킷 수 초과: {count} (최대 {max})")]
    TooManyPackets { count: usize, max: usize },

    #[error("이미지 크기 초과: {len} bytes")]
    ImageTooLarge { len: usize },

    #[error("대상 노드 목록이 비어 있음")]
    EmptyNodeList,

    #[error("주소를 알 수 없는 노드: {0}")]
    UnknownNode(u16),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

/// 수신 바이트 파싱 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("버퍼 부족: expected {expected} bytes, got {got}")]
    ShortBuffer { expected: usize, got: usize },

    #[error("유효하지 않은 SOF: {0:#04X}")]
    BadSof(u8),

    #[error("유효하지 않은 EOF: {0:#04X}")]
    BadEof(u8),

    #[error("길이 불일치: payload_len {declared}, 실제 {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("헤더 CRC 불일치: expected {expected:08X}, got {got:08X}")]
    HeaderChecksum { expected: u32, got: u32 },

    #[error("헤더 프레임이 아님: frame_type={0}, sequence_num={1}")]
    NotAHeader(u8, u8),

    #[error("{field} 범위 초과: {value} (최대 {max})")]
    FieldOutOfRange {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("다른 프레임에 대한 응답: response_to_type {got}, 보낸 frame_type {expected}")]
    ResponseTypeMismatch { expected: u8, got: u8 },
}

/// 한 번의 전송 시도가 실패한 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// 노드가 NACK 응답
    Nack { error_code: u32, message: String },

    /// 0/1 이외의 ack_status
    UnknownStatus(u8),

    /// 타임아웃 내 응답 없음
    Timeout,

    /// 응답 파싱 실패
    Malformed(ParseError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Nack { error_code, message } if message.is_empty() => {
                write!(f, "NACK (error_code={})", error_code)
            }
            FailureReason::Nack { error_code, message } => {
                write!(f, "NACK (error_code={}): {}", error_code, message)
            }
            FailureReason::UnknownStatus(status) => write!(f, "알 수 없는 응답 상태 {}", status),
            FailureReason::Timeout => write!(f, "ACK 타임아웃"),
            FailureReason::Malformed(e) => write!(f, "잘못된 ACK: {}", e),
        }
    }
}

/// FOTA 전송 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("생성 에러: {0}")]
    Construction(#[from] ConstructionError),

    #[error("파싱 에러: {0}")]
    Parse(#[from] ParseError),

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error(
        "재시도 초과: datagram_id={datagram_id}, sequence_num={sequence_num}, attempts={attempts}, last={last_failure}"
    )]
    RetryExhausted {
        datagram_id: u32,
        sequence_num: u8,
        attempts: u32,
        last_failure: FailureReason,
    },

    #[error("전송 중단: datagram_id={datagram_id}, sequence_num={sequence_num}")]
    Aborted { datagram_id: u32, sequence_num: u8 },

    #[error("예상하지 않은 데이터그램: expected {expected}, got {got}")]
    UnexpectedDatagram { expected: u32, got: u32 },

    #[error("유효하지 않은 sequence_num: {sequence_num} (패킷 수 {num_packets})")]
    UnexpectedSequence { sequence_num: u8, num_packets: u16 },

    #[error("데이터그램 길이 불일치: expected {expected}, got {got}")]
    LengthMismatch { expected: u32, got: u32 },

    #[error("데이터그램 미완성: {received}/{expected} 패킷")]
    Incomplete { received: u16, expected: u16 },

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 재시도 루프 밖으로 전파되는 종료성 에러 여부
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::Parse(_) | Error::ChecksumMismatch { .. })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
