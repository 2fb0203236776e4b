//! 송신자 (호스트측)
//!
//! - 한 번에 프레임(또는 윈도우) 하나만 전송 중
//! - ACK 대기가 유일한 대기 지점이며 타임아웃은 NACK 과 같이 재시도 횟수에 포함
//! - 재시도 초과 시 데이터그램 전체 중단, 이후 프레임으로 진행하지 않음

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::ack::{Ack, AckStatus};
use crate::config::{AckMode, Config};
use crate::datagram::{Datagram, DatagramBuilder};
use crate::error::{ConstructionError, Error, FailureReason, ParseError, Result};
use crate::frame::Frame;
use crate::stats::TransferStats;
use crate::transport::Transport;

/// 송신 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitState {
    Idle,
    Sending { datagram_id: u32, sequence_num: u8 },
    AwaitingAck { datagram_id: u32, sequence_num: u8 },
    Advancing { datagram_id: u32, sequence_num: u8 },
    Retrying { datagram_id: u32, sequence_num: u8, attempt: u32 },
    Aborted { datagram_id: u32, sequence_num: u8 },
    Completed { datagram_id: u32 },
    Failed { datagram_id: u32, sequence_num: u8 },
}

/// 프레임 사이에서 전송을 중단시키는 핸들
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// 다음 프레임 경계에서 중단 요청
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 중단 요청 해제
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 송신자
pub struct Transmitter<T> {
    transport: T,
    config: Config,
    state: TransmitState,
    stats: TransferStats,
    abort: AbortHandle,
}

impl<T: Transport> Transmitter<T> {
    /// 새 송신자 생성
    pub fn new(transport: T, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            state: TransmitState::Idle,
            stats: TransferStats::new(),
            abort: AbortHandle::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> TransmitState {
        self.state
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// 프레임 하나 전송 후 ACK 대기 (재시도 포함)
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<Ack> {
        self.exchange(std::slice::from_ref(frame)).await
    }

    /// 윈도우 단위 전송: 프레임들을 연속 전송 후 ACK 하나 대기
    ///
    /// 실패 시 윈도우 전체를 재전송한다.
    pub async fn send_window(&mut self, frames: &[Frame]) -> Result<Ack> {
        self.exchange(frames).await
    }

    /// 설정된 ACK 모드로 데이터그램 전송
    pub async fn transmit(&mut self, datagram: &Datagram) -> Result<()> {
        let ack_mode = self.config.ack_mode;
        self.transmit_with(datagram, ack_mode).await
    }

    /// 지정한 ACK 모드로 데이터그램 전송
    ///
    /// 헤더 프레임은 항상 프레임 단위로 확인한 뒤 payload 를 보낸다.
    pub async fn transmit_with(&mut self, datagram: &Datagram, ack_mode: AckMode) -> Result<()> {
        let datagram_id = datagram.datagram_id();

        info!(
            "데이터그램 {} 전송 시작: node={}, {} 패킷, {} bytes, {:?}",
            datagram_id,
            datagram.target_node(),
            datagram.packets().len(),
            datagram.header().total_length(),
            ack_mode
        );

        match self.transmit_frames(datagram, ack_mode).await {
            Ok(()) => {
                self.state = TransmitState::Completed { datagram_id };
                self.stats.completed_datagrams += 1;
                info!("데이터그램 {} 전송 완료", datagram_id);
                Ok(())
            }
            Err(e) => {
                // 협조적 중단은 Aborted 상태 유지
                if !matches!(e, Error::Aborted { .. }) {
                    let sequence_num = match self.state {
                        TransmitState::Sending { sequence_num, .. }
                        | TransmitState::AwaitingAck { sequence_num, .. }
                        | TransmitState::Retrying { sequence_num, .. }
                        | TransmitState::Aborted { sequence_num, .. } => sequence_num,
                        _ => 0,
                    };
                    self.state = TransmitState::Failed {
                        datagram_id,
                        sequence_num,
                    };
                }
                self.stats.failed_datagrams += 1;
                warn!("데이터그램 {} 전송 실패: {}", datagram_id, e);
                Err(e)
            }
        }
    }

    /// 여러 데이터그램을 순서대로 전송, 첫 실패에서 중단
    pub async fn transmit_all(&mut self, datagrams: &[Datagram]) -> Result<()> {
        for datagram in datagrams {
            self.transmit(datagram).await?;
        }
        Ok(())
    }

    /// 같은 데이터그램을 노드마다 헤더만 바꿔 전송
    pub async fn transmit_to_nodes(
        &mut self,
        builder: &DatagramBuilder,
        datagram: &Datagram,
        target_nodes: &[u8],
    ) -> Result<()> {
        if target_nodes.is_empty() {
            return Err(ConstructionError::EmptyNodeList.into());
        }

        for &node in target_nodes {
            if node == datagram.target_node() {
                self.transmit(datagram).await?;
            } else {
                let retargeted = builder.retarget(datagram, node)?;
                self.transmit(&retargeted).await?;
            }
        }
        Ok(())
    }

    async fn transmit_frames(&mut self, datagram: &Datagram, ack_mode: AckMode) -> Result<()> {
        self.send_frame(datagram.header_frame()).await?;

        match ack_mode {
            AckMode::PerFrame => {
                for frame in datagram.packets() {
                    self.send_frame(frame).await?;
                }
            }
            AckMode::Windowed { window_size } => {
                for window in datagram.packets().chunks(window_size.max(1)) {
                    self.send_window(window).await?;
                }
            }
        }

        Ok(())
    }

    /// 전송-대기-재시도 루프
    async fn exchange(&mut self, frames: &[Frame]) -> Result<Ack> {
        let Some(first) = frames.first() else {
            return Err(ConstructionError::InvalidConfig("빈 윈도우".into()).into());
        };
        let datagram_id = first.datagram_id();
        let sequence_num = first.sequence_num();
        let max_retries = self.config.max_retries;
        let timeout = self.config.ack_timeout();

        let mut last_failure = FailureReason::Timeout;

        for attempt in 0..=max_retries {
            if self.abort.is_aborted() {
                self.state = TransmitState::Aborted {
                    datagram_id,
                    sequence_num,
                };
                info!(
                    "전송 중단 요청: datagram_id={}, sequence_num={}",
                    datagram_id, sequence_num
                );
                return Err(Error::Aborted {
                    datagram_id,
                    sequence_num,
                });
            }

            if attempt > 0 {
                self.state = TransmitState::Retrying {
                    datagram_id,
                    sequence_num,
                    attempt,
                };
                warn!(
                    "재전송 {}/{}: datagram_id={}, sequence_num={}, 이유={}",
                    attempt, max_retries, datagram_id, sequence_num, last_failure
                );
            }

            // 이전 시도의 늦은 응답이 이번 시도의 응답으로 읽히지 않도록 비움
            let stale = self.transport.discard().await?;
            if stale > 0 {
                debug!(
                    "늦게 도착한 응답 {} bytes 폐기: datagram_id={}, sequence_num={}",
                    stale, datagram_id, sequence_num
                );
            }

            for frame in frames {
                self.state = TransmitState::Sending {
                    datagram_id,
                    sequence_num: frame.sequence_num(),
                };
                self.transport.write(&frame.pack()).await?;
                self.stats.record_send(frame.wire_len(), attempt > 0);
                trace!("전송: {}", frame);
            }

            self.state = TransmitState::AwaitingAck {
                datagram_id,
                sequence_num,
            };

            match self.await_ack(timeout, first.frame_type().into()).await? {
                Ok(ack) => {
                    self.stats.total_acks += 1;
                    self.state = TransmitState::Advancing {
                        datagram_id,
                        sequence_num,
                    };
                    debug!(
                        "ACK 수신: datagram_id={}, sequence_num={}, frames={}",
                        datagram_id,
                        sequence_num,
                        frames.len()
                    );
                    return Ok(ack);
                }
                Err((reason, checksum_failure)) => {
                    self.stats.record_failure(&reason, checksum_failure);
                    last_failure = reason;
                }
            }
        }

        self.state = TransmitState::Aborted {
            datagram_id,
            sequence_num,
        };

        Err(Error::RetryExhausted {
            datagram_id,
            sequence_num,
            attempts: max_retries + 1,
            last_failure,
        })
    }

    /// 응답 하나를 읽어 분류
    ///
    /// 바깥 Result 는 전송 계층 에러(종료성), 안쪽은 재시도 대상 실패.
    /// response_to_type 이 보낸 frame_type 과 다르면 다른 프레임에 대한 응답이므로 잘못된 응답으로 본다.
    async fn await_ack(
        &mut self,
        timeout: std::time::Duration,
        frame_type: u8,
    ) -> Result<std::result::Result<Ack, (FailureReason, bool)>> {
        let Some(bytes) = self.transport.read(timeout).await? else {
            return Ok(Err((FailureReason::Timeout, false)));
        };

        let ack = match Ack::parse(&bytes) {
            Ok(ack) => ack,
            Err(e) => return Ok(Err((FailureReason::Malformed(e), false))),
        };

        if ack.response_to_type() != frame_type {
            let mismatch = ParseError::ResponseTypeMismatch {
                expected: frame_type,
                got: ack.response_to_type(),
            };
            return Ok(Err((FailureReason::Malformed(mismatch), false)));
        }

        Ok(match ack.status() {
            AckStatus::Ack => Ok(ack),
            AckStatus::Nack => {
                let checksum_failure = ack.node_error().is_checksum_failure();
                Err((
                    FailureReason::Nack {
                        error_code: ack.error_code(),
                        message: ack.error_message().into_owned(),
                    },
                    checksum_failure,
                ))
            }
            AckStatus::Unknown(status) => Err((FailureReason::UnknownStatus(status), false)),
        })
    }
}
