//! 부트로더 명령 데이터그램
//!
//! 명령 하나는 노드 목록에 대해 데이터그램 여러 개로 풀린다.
//! ping 은 메타데이터 데이터그램을 모든 노드에 먼저 보낸 뒤 데이터를 윈도우 단위로 보낸다.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::info;

use crate::checksum::ChecksumEngine;
use crate::config::AckMode;
use crate::datagram::{Datagram, DatagramBuilder};
use crate::error::{ConstructionError, Result};
use crate::frame::FrameType;
use crate::transmitter::Transmitter;
use crate::transport::Transport;

/// ping 데이터 최대 길이 (메타데이터 12비트 필드)
pub const PING_MAX_DATA_LEN: usize = 0xFFF;

/// ping 메타데이터 크기 (48비트)
pub const PING_METADATA_LEN: usize = 6;

/// ping 데이터 전송 윈도우 (설정이 PerFrame 일 때)
pub const PING_WINDOW_SIZE: usize = 8;

/// 논리 노드 id 를 헤더의 target_node 로 변환
pub trait NodeAddressing {
    fn resolve(&self, node_id: u16) -> Option<u8>;
}

/// node_id 를 그대로 target_node 로 사용 (0..=255)
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAddressing;

impl NodeAddressing for DirectAddressing {
    fn resolve(&self, node_id: u16) -> Option<u8> {
        u8::try_from(node_id).ok()
    }
}

impl NodeAddressing for HashMap<u16, u8> {
    fn resolve(&self, node_id: u16) -> Option<u8> {
        self.get(&node_id).copied()
    }
}

/// ping 요청 (4비트 명령 + 데이터)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    cmd: u8,
    data: Bytes,
}

impl PingRequest {
    pub fn new(cmd: u8, data: impl Into<Bytes>) -> std::result::Result<Self, ConstructionError> {
        let data = data.into();
        if data.len() > PING_MAX_DATA_LEN {
            return Err(ConstructionError::PayloadTooLarge {
                len: data.len(),
                max: PING_MAX_DATA_LEN,
            });
        }
        if cmd > 0x0F {
            return Err(ConstructionError::InvalidConfig(format!(
                "ping 명령 {} 는 4비트를 넘음",
                cmd
            )));
        }
        Ok(Self { cmd, data })
    }

    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// `cmd << 44 | len << 32 | checksum(data)`
    pub fn metadata(&self, engine: &ChecksumEngine) -> u64 {
        let cmd = (self.cmd as u64 & 0xF) << 44;
        let len = (self.data.len() as u64 & 0xFFF) << 32;
        cmd | len | engine.checksum(&self.data) as u64
    }

    /// 메타데이터 6 bytes (LE)
    pub fn encode_metadata(&self, engine: &ChecksumEngine) -> [u8; PING_METADATA_LEN] {
        let mut out = [0u8; PING_METADATA_LEN];
        out.copy_from_slice(&self.metadata(engine).to_le_bytes()[..PING_METADATA_LEN]);
        out
    }
}

/// 명령 종류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    JumpToApplication,
    JumpToBootloader,
    Ping(PingRequest),
}

/// 전송 단위 하나 (데이터그램 + ACK 모드)
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub datagram: Datagram,
    pub ack_mode: AckMode,
}

/// 명령 데이터그램 생성기
pub struct CommandBuilder<A> {
    builder: DatagramBuilder,
    addressing: A,
    next_id: u32,
}

impl<A: NodeAddressing> CommandBuilder<A> {
    pub fn new(builder: DatagramBuilder, addressing: A) -> Self {
        Self {
            builder,
            addressing,
            next_id: 0,
        }
    }

    /// 첫 datagram_id 지정
    pub fn starting_at(mut self, datagram_id: u32) -> Self {
        self.next_id = datagram_id;
        self
    }

    /// 다음에 할당될 datagram_id
    pub fn next_datagram_id(&self) -> u32 {
        self.next_id
    }

    pub fn datagram_builder(&self) -> &DatagramBuilder {
        &self.builder
    }

    /// 명령을 노드별 전송 단위로 변환
    pub fn build(&mut self, kind: &CommandKind, node_ids: &[u16]) -> Result<Vec<CommandStep>> {
        let targets = self.resolve_all(node_ids)?;
        let configured = self.builder.config().ack_mode;

        match kind {
            CommandKind::JumpToApplication => {
                self.fan_out(FrameType::JumpToApplication, &[], &targets, configured)
            }
            CommandKind::JumpToBootloader => {
                self.fan_out(FrameType::JumpToBootloader, &[], &targets, configured)
            }
            CommandKind::Ping(request) => {
                let metadata = request.encode_metadata(self.builder.engine());
                let window = match configured {
                    AckMode::Windowed { .. } => configured,
                    AckMode::PerFrame => AckMode::Windowed {
                        window_size: PING_WINDOW_SIZE,
                    },
                };

                let mut steps =
                    self.fan_out(FrameType::PingMetadata, &metadata, &targets, AckMode::PerFrame)?;
                steps.extend(self.fan_out(FrameType::PingData, request.data(), &targets, window)?);
                Ok(steps)
            }
        }
    }

    fn resolve_all(&self, node_ids: &[u16]) -> Result<Vec<u8>> {
        if node_ids.is_empty() {
            return Err(ConstructionError::EmptyNodeList.into());
        }

        node_ids
            .iter()
            .map(|&id| {
                self.addressing
                    .resolve(id)
                    .ok_or_else(|| ConstructionError::UnknownNode(id).into())
            })
            .collect()
    }

    /// 같은 datagram_id 로 노드마다 헤더만 바꿔 생성
    fn fan_out(
        &mut self,
        frame_type: FrameType,
        payload: &[u8],
        targets: &[u8],
        ack_mode: AckMode,
    ) -> Result<Vec<CommandStep>> {
        let datagram_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let first = if payload.is_empty() {
            self.builder.control(frame_type, datagram_id, targets[0])?
        } else {
            self.builder.build(frame_type, payload, datagram_id, targets[0])?
        };
        let others = targets[1..]
            .iter()
            .map(|&node| self.builder.retarget(&first, node))
            .collect::<Result<Vec<_>>>()?;

        let steps = std::iter::once(first)
            .chain(others)
            .map(|datagram| CommandStep { datagram, ack_mode })
            .collect();
        Ok(steps)
    }
}

impl<T: Transport> Transmitter<T> {
    /// 명령 전송 단위들을 순서대로 전송
    pub async fn send_command(&mut self, steps: &[CommandStep]) -> Result<()> {
        info!("명령 전송: {} 데이터그램", steps.len());
        for step in steps {
            self.transmit_with(&step.datagram, step.ack_mode).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::Ack;
    use crate::config::Config;
    use crate::error::Error;
    use crate::transport::StreamTransport;

    fn commands() -> CommandBuilder<DirectAddressing> {
        let builder = DatagramBuilder::new(Config::default()).unwrap();
        CommandBuilder::new(builder, DirectAddressing).starting_at(100)
    }

    #[test]
    fn test_ping_metadata_layout() {
        let engine = ChecksumEngine::default();
        let request = PingRequest::new(0x3, &b"1234"[..]).unwrap();

        assert_eq!(request.metadata(&engine), 0x3_004_3DF6_EBD7);
        assert_eq!(
            request.encode_metadata(&engine),
            [0xD7, 0xEB, 0xF6, 0x3D, 0x04, 0x30]
        );
    }

    #[test]
    fn test_ping_request_limits() {
        assert!(matches!(
            PingRequest::new(1, vec![0u8; PING_MAX_DATA_LEN + 1]),
            Err(ConstructionError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            PingRequest::new(0x10, Bytes::new()),
            Err(ConstructionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_jump_fans_out_per_node() {
        let mut commands = commands();

        let steps = commands
            .build(&CommandKind::JumpToApplication, &[1, 2, 3])
            .unwrap();

        assert_eq!(steps.len(), 3);
        let nodes: Vec<u8> = steps.iter().map(|s| s.datagram.target_node()).collect();
        assert_eq!(nodes, vec![1, 2, 3]);
        assert!(steps.iter().all(|s| s.datagram.datagram_id() == 100));
        let control = steps[0].datagram.packets();
        assert_eq!(control.len(), 1);
        assert_eq!(control[0].frame_type(), FrameType::JumpToApplication);
        assert_eq!(control[0].payload_len(), 0);
        assert_eq!(steps[0].datagram.header().total_length(), 0);
        assert!(steps.iter().all(|s| s.ack_mode == AckMode::PerFrame));
        assert_eq!(commands.next_datagram_id(), 101);
    }

    #[test]
    fn test_ping_sends_metadata_then_windowed_data() {
        let mut commands = commands();
        let request = PingRequest::new(2, vec![0x5A; 300]).unwrap();

        let steps = commands.build(&CommandKind::Ping(request), &[7, 8]).unwrap();

        assert_eq!(steps.len(), 4);
        let meta = &steps[0].datagram;
        assert_eq!(meta.packets().len(), 1);
        assert_eq!(meta.packets()[0].frame_type(), FrameType::PingMetadata);
        assert_eq!(meta.payload().len(), PING_METADATA_LEN);
        assert_eq!(steps[1].datagram.target_node(), 8);

        let data = &steps[2].datagram;
        assert_eq!(data.datagram_id(), 101);
        assert_eq!(data.packets().len(), 3);
        assert!(data.packets().iter().all(|p| p.frame_type() == FrameType::PingData));
        assert_eq!(
            steps[2].ack_mode,
            AckMode::Windowed { window_size: PING_WINDOW_SIZE }
        );
    }

    #[test]
    fn test_addressing_failures() {
        let mut commands = commands();
        assert!(matches!(
            commands.build(&CommandKind::JumpToBootloader, &[]),
            Err(Error::Construction(ConstructionError::EmptyNodeList))
        ));
        assert!(matches!(
            commands.build(&CommandKind::JumpToBootloader, &[1, 300]),
            Err(Error::Construction(ConstructionError::UnknownNode(300)))
        ));

        let table: HashMap<u16, u8> = [(1000, 4)].into_iter().collect();
        let builder = DatagramBuilder::new(Config::default()).unwrap();
        let mut mapped = CommandBuilder::new(builder, table);
        let steps = mapped.build(&CommandKind::JumpToBootloader, &[1000]).unwrap();
        assert_eq!(steps[0].datagram.target_node(), 4);
    }

    #[tokio::test]
    async fn test_send_command_over_stream() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut commands = commands();
        let steps = commands.build(&CommandKind::JumpToApplication, &[1, 2]).unwrap();
        let frame_lens: Vec<usize> = steps
            .iter()
            .flat_map(|s| s.datagram.frames().map(|f| f.wire_len()).collect::<Vec<_>>())
            .collect();
        assert_eq!(frame_lens, vec![34, 14, 34, 14]);

        let (local, mut node) = tokio::io::duplex(4096);
        let node_task = tokio::spawn(async move {
            for len in frame_lens {
                let mut frame = vec![0u8; len];
                node.read_exact(&mut frame).await.unwrap();
                node.write_all(&Ack::ack(frame[1]).to_bytes()).await.unwrap();
            }
        });

        let mut tx = Transmitter::new(StreamTransport::new(local), Config::default()).unwrap();
        tx.send_command(&steps).await.unwrap();
        node_task.await.unwrap();

        assert_eq!(tx.stats().completed_datagrams, 2);
    }
}
