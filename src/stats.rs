//! 전송 통계

use std::time::{Duration, Instant};

use crate::error::FailureReason;

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 총 프레임 전송 횟수 (재전송 포함)
    pub frames_sent: u64,

    /// 재전송 프레임 수
    pub retransmitted_frames: u64,

    /// 총 전송 바이트 (와이어 기준)
    pub bytes_sent: u64,

    /// 수신한 ACK 수
    pub total_acks: u64,

    /// 수신한 NACK 수
    pub total_nacks: u64,

    /// ACK 타임아웃 횟수
    pub timeouts: u64,

    /// 파싱 실패 또는 알 수 없는 상태 응답 수
    pub malformed_acks: u64,

    /// CRC 불일치로 보고된 NACK 수
    pub checksum_failures: u64,

    /// 완료된 데이터그램 수
    pub completed_datagrams: u64,

    /// 실패한 데이터그램 수
    pub failed_datagrams: u64,

    /// 마지막 NACK 시간
    pub last_nack_time: Option<Instant>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            retransmitted_frames: 0,
            bytes_sent: 0,
            total_acks: 0,
            total_nacks: 0,
            timeouts: 0,
            malformed_acks: 0,
            checksum_failures: 0,
            completed_datagrams: 0,
            failed_datagrams: 0,
            last_nack_time: None,
        }
    }

    /// 프레임 전송 기록
    pub fn record_send(&mut self, wire_len: usize, is_retry: bool) {
        self.frames_sent += 1;
        self.bytes_sent += wire_len as u64;
        if is_retry {
            self.retransmitted_frames += 1;
        }
    }

    /// 실패 응답 기록
    pub(crate) fn record_failure(&mut self, reason: &FailureReason, checksum_failure: bool) {
        match reason {
            FailureReason::Nack { .. } => {
                self.total_nacks += 1;
                self.last_nack_time = Some(Instant::now());
            }
            FailureReason::Timeout => self.timeouts += 1,
            FailureReason::UnknownStatus(_) | FailureReason::Malformed(_) => self.malformed_acks += 1,
        }
        if checksum_failure {
            self.checksum_failures += 1;
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.retransmitted_frames as f64 / self.frames_sent as f64
    }

    /// 통계 리셋
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Datagrams: {} ok / {} failed | Frames: {} ({} retx) | Bytes: {} | ACK/NACK: {}/{} | Timeouts: {} | CRC: {}",
            self.elapsed().as_secs_f64(),
            self.completed_datagrams,
            self.failed_datagrams,
            self.frames_sent,
            self.retransmitted_frames,
            self.bytes_sent,
            self.total_acks,
            self.total_nacks,
            self.timeouts,
            self.checksum_failures,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
