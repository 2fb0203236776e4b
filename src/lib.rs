//! # fotalink
//!
//! 직렬/CAN 링크용 FOTA 신뢰 전송 프로토콜 (호스트측)
//!
//! ## 핵심 특징
//! - **프레임 단위 CRC**: payload 마다 워드 역순 CRC32 로 손상 검출
//! - **데이터그램**: 헤더 프레임(대상 노드, 길이, 전체 CRC) + 순서대로 번호 붙은 payload 프레임
//! - **stop-and-wait**: ACK 확인 후 다음 프레임, NACK/타임아웃 시 제한된 횟수만큼 재전송
//! - **윈도우 모드**: 진단 데이터 등은 여러 프레임 후 ACK 하나
//! - **부트로더 명령**: 애플리케이션/부트로더 점프, ping

pub mod ack;
pub mod checksum;
pub mod command;
pub mod config;
pub mod datagram;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod stats;
pub mod transmitter;
pub mod transport;

pub use ack::{Ack, AckStatus, NodeErrorCode};
pub use checksum::ChecksumEngine;
pub use command::{CommandBuilder, CommandKind, CommandStep, DirectAddressing, NodeAddressing, PingRequest};
pub use config::{AckMode, Config, FrameLimits, SequenceWidth};
pub use datagram::{Datagram, DatagramBuilder, DatagramHeader};
pub use error::{ConstructionError, Error, FailureReason, ParseError, Result};
pub use frame::{Frame, FrameType};
pub use receiver::{DatagramAssembler, FrameDecoder};
pub use stats::TransferStats;
pub use transmitter::{AbortHandle, TransmitState, Transmitter};
pub use transport::{StreamTransport, Transport};

/// 프레임 시작 바이트
pub const SOF: u8 = 0xAA;

/// 프레임 끝 바이트
pub const EOF: u8 = 0xBB;

/// payload 를 제외한 프레임 크기 (SOF, type, id, seq, len, crc32, EOF)
pub const FRAME_OVERHEAD: usize = 14;

/// ACK 레코드 크기 (바이트)
pub const ACK_RECORD_SIZE: usize = 262;

/// ACK 에러 메시지 필드 크기
pub const ERROR_MESSAGE_LEN: usize = 256;

/// 기본 CRC 다항식
pub const DEFAULT_POLYNOMIAL: u32 = 0x04C1_1DB7;

/// 기본 payload 최대 크기 (바이트)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 128;

/// 구형 링크 payload 최대 크기 (바이트)
pub const LEGACY_MAX_PAYLOAD_SIZE: usize = 64;

/// 데이터그램 헤더 payload 크기
pub const HEADER_PAYLOAD_SIZE: usize = 20;
