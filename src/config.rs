//! 프로토콜 설정
//!
//! 관측된 레거시 변형들은 payload 최대 크기(64 / 128), sequence_num 폭(3비트 / 8비트),
//! ACK 단위(프레임 / 윈도우)가 서로 다르다. 어느 하나를 고정하지 않고 모두 설정값으로 둔다.

use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;
use crate::{DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_POLYNOMIAL, HEADER_PAYLOAD_SIZE, LEGACY_MAX_PAYLOAD_SIZE};

/// sequence_num 비트 폭
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceWidth {
    /// 3비트 (0..=7), 구형 검증 스크립트 변형
    Bits3,

    /// 1바이트 전체 (0..=255)
    Full,
}

impl SequenceWidth {
    /// 표현 가능한 최대 sequence_num
    pub fn max(self) -> u8 {
        match self {
            SequenceWidth::Bits3 => 0x07,
            SequenceWidth::Full => u8::MAX,
        }
    }
}

/// ACK 대기 단위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckMode {
    /// 프레임마다 ACK 대기 (펌웨어 이미지)
    PerFrame,

    /// window_size 개 프레임을 연속 전송 후 ACK 하나 대기 (진단 문자열 등)
    Windowed { window_size: usize },
}

/// 프레임 생성/파싱 시 검증 한도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_payload_size: usize,
    pub sequence_width: SequenceWidth,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            sequence_width: SequenceWidth::Full,
        }
    }
}

/// FOTA 전송 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// CRC 생성 다항식
    pub polynomial: u32,

    /// 프레임 payload 최대 크기 (바이트)
    pub max_payload_size: usize,

    /// 소스 분할 크기 (바이트), max_payload_size 이하
    pub chunk_size: usize,

    /// sequence_num 비트 폭
    pub sequence_width: SequenceWidth,

    /// ACK 단위
    pub ack_mode: AckMode,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 프레임(또는 윈도우)당 최대 재시도 횟수
    /// 총 전송 시도는 max_retries + 1
    pub max_retries: u32,

    /// 데이터그램당 최대 payload 프레임 수 (헤더 제외)
    pub max_packets_per_datagram: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polynomial: DEFAULT_POLYNOMIAL,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            chunk_size: DEFAULT_MAX_PAYLOAD_SIZE,
            sequence_width: SequenceWidth::Full,
            ack_mode: AckMode::PerFrame,
            ack_timeout_ms: 1000,
            max_retries: 3,
            max_packets_per_datagram: u8::MAX as u16,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// XBee 검증 스크립트 변형 (64바이트 payload, 3비트 sequence)
    pub fn legacy_xbee() -> Self {
        Self {
            max_payload_size: LEGACY_MAX_PAYLOAD_SIZE,
            chunk_size: LEGACY_MAX_PAYLOAD_SIZE,
            sequence_width: SequenceWidth::Bits3,
            max_packets_per_datagram: SequenceWidth::Bits3.max() as u16,
            ..Self::default()
        }
    }

    /// 비필수 대량 데이터용 (윈도우 단위 ACK)
    pub fn bulk_diagnostics() -> Self {
        Self {
            ack_mode: AckMode::Windowed { window_size: 8 },
            ack_timeout_ms: 2000,
            ..Self::default()
        }
    }

    /// ACK 모드 변경
    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    /// 프레임 검증 한도
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_payload_size: self.max_payload_size,
            sequence_width: self.sequence_width,
        }
    }

    /// ACK 타임아웃
    pub fn ack_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ack_timeout_ms)
    }

    /// 데이터그램 하나에 실을 수 있는 최대 payload 프레임 수
    ///
    /// sequence_num 은 1부터 시작하므로 sequence 폭의 최대값과
    /// max_packets_per_datagram 중 작은 값
    pub fn packets_per_datagram(&self) -> usize {
        (self.sequence_width.max() as usize).min(self.max_packets_per_datagram as usize)
    }

    /// 설정 일관성 검사
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.max_payload_size == 0 || self.max_payload_size > u16::MAX as usize {
            return Err(ConstructionError::InvalidConfig(format!(
                "max_payload_size {} 는 1..=65535 이어야 함",
                self.max_payload_size
            )));
        }

        if self.max_payload_size < HEADER_PAYLOAD_SIZE {
            return Err(ConstructionError::InvalidConfig(format!(
                "max_payload_size {} 는 헤더 payload {} bytes 이상이어야 함",
                self.max_payload_size, HEADER_PAYLOAD_SIZE
            )));
        }

        if self.chunk_size == 0 || self.chunk_size > self.max_payload_size {
            return Err(ConstructionError::InvalidConfig(format!(
                "chunk_size {} 는 1..={} 이어야 함",
                self.chunk_size, self.max_payload_size
            )));
        }

        if self.max_packets_per_datagram == 0 {
            return Err(ConstructionError::InvalidConfig(
                "max_packets_per_datagram 는 1 이상이어야 함".into(),
            ));
        }

        if let AckMode::Windowed { window_size } = self.ack_mode {
            if window_size == 0 {
                return Err(ConstructionError::InvalidConfig(
                    "window_size 는 1 이상이어야 함".into(),
                ));
            }
        }

        Ok(())
    }
}
