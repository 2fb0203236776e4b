//! 송신자 ↔ 시뮬레이션 노드 통합 테스트
//!
//! tokio duplex 위에서 노드는 FrameDecoder/DatagramAssembler 로 프레임을 받아 ACK 레코드로 응답한다.

use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing_subscriber::EnvFilter;

use fotalink::{
    Ack, AckMode, ChecksumEngine, Config, DatagramAssembler, DatagramBuilder, DatagramHeader, Error,
    FailureReason, Frame, FrameDecoder, FrameType, StreamTransport, Transmitter,
};

const CRC32_MISMATCH: u32 = 5;
const FLASH_WRITE_FAILED: u32 = 7;
const INVALID_PACKET: u32 = 13;
const NO_DATAGRAM_FOUND: u32 = 21;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// 완료된 데이터그램 (target_node, 데이터)
type Completed = Vec<(u8, Bytes)>;

/// 시뮬레이션 노드
struct SimulatedNode {
    config: Config,
    window: usize,
    rng: StdRng,
    corrupt_rate: f64,
    drop_ack_rate: f64,
    always_nack: Option<(u32, &'static str)>,
    silent: bool,
}

impl SimulatedNode {
    fn new(config: Config) -> Self {
        let window = match config.ack_mode {
            AckMode::PerFrame => 1,
            AckMode::Windowed { window_size } => window_size,
        };
        Self {
            config,
            window,
            rng: StdRng::seed_from_u64(0x5EED),
            corrupt_rate: 0.0,
            drop_ack_rate: 0.0,
            always_nack: None,
            silent: false,
        }
    }

    fn lossy(mut self, seed: u64, corrupt_rate: f64, drop_ack_rate: f64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.corrupt_rate = corrupt_rate;
        self.drop_ack_rate = drop_ack_rate;
        self
    }

    fn spawn(self, stream: DuplexStream) -> tokio::task::JoinHandle<Completed> {
        tokio::spawn(self.run(stream))
    }

    async fn run(mut self, mut stream: DuplexStream) -> Completed {
        let engine = ChecksumEngine::new(self.config.polynomial);
        let mut decoder = FrameDecoder::from_config(&self.config);
        let mut assembler: Option<DatagramAssembler> = None;
        let mut last_done: Option<(u8, u32)> = None;
        let mut since_ack = 0usize;
        let mut completed = Vec::new();
        let mut buf = [0u8; 512];

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);

            while let Some(result) = decoder.next_frame() {
                if self.silent {
                    continue;
                }

                let reply = match result {
                    Err(_) => Some(Ack::nack(0, CRC32_MISMATCH, "crc32 mismatch")),
                    Ok(frame) if self.rng.gen_bool(self.corrupt_rate) => {
                        Some(Ack::nack(frame.frame_type().into(), CRC32_MISMATCH, "crc32 mismatch"))
                    }
                    Ok(frame) => match self.always_nack {
                        Some((code, message)) => Some(Ack::nack(frame.frame_type().into(), code, message)),
                        None => self.handle(
                            &frame,
                            &engine,
                            &mut assembler,
                            &mut last_done,
                            &mut since_ack,
                            &mut completed,
                        ),
                    },
                };

                let Some(reply) = reply else { continue };
                if self.rng.gen_bool(self.drop_ack_rate) {
                    continue;
                }
                if stream.write_all(&reply.to_bytes()).await.is_err() {
                    return completed;
                }
            }
        }

        completed
    }

    fn handle(
        &mut self,
        frame: &Frame,
        engine: &ChecksumEngine,
        assembler: &mut Option<DatagramAssembler>,
        last_done: &mut Option<(u8, u32)>,
        since_ack: &mut usize,
        completed: &mut Completed,
    ) -> Option<Ack> {
        let response_to = frame.frame_type().into();

        if frame.frame_type() == FrameType::Header {
            let header = match DatagramHeader::decode(frame.payload(), engine) {
                Ok(header) => header,
                Err(_) => return Some(Ack::nack(response_to, INVALID_PACKET, "bad header")),
            };
            *since_ack = 0;
            if *last_done == Some((header.target_node(), header.datagram_id())) {
                return Some(Ack::ack(response_to));
            }

            let fresh = match DatagramAssembler::new(frame, engine.clone()) {
                Ok(fresh) => fresh,
                Err(_) => return Some(Ack::nack(response_to, INVALID_PACKET, "bad header")),
            };
            if fresh.is_complete() {
                *last_done = Some((header.target_node(), header.datagram_id()));
                if let Ok(data) = fresh.finish() {
                    completed.push((header.target_node(), data));
                }
                *assembler = None;
            } else {
                *assembler = Some(fresh);
            }
            return Some(Ack::ack(response_to));
        }

        let Some(current) = assembler.as_mut() else {
            return match last_done {
                Some((_, id)) if *id == frame.datagram_id() => Some(Ack::ack(response_to)),
                _ => Some(Ack::nack(response_to, NO_DATAGRAM_FOUND, "no datagram")),
            };
        };

        if current.insert(frame).is_err() {
            return Some(Ack::nack(response_to, INVALID_PACKET, "unexpected frame"));
        }
        *since_ack += 1;

        if current.is_complete() {
            let node = current.header().target_node();
            let id = current.header().datagram_id();
            if let Some(done) = assembler.take() {
                match done.finish() {
                    Ok(data) => completed.push((node, data)),
                    Err(_) => return Some(Ack::nack(response_to, CRC32_MISMATCH, "datagram crc")),
                }
            }
            *last_done = Some((node, id));
            *since_ack = 0;
            return Some(Ack::ack(response_to));
        }

        if *since_ack >= self.window {
            *since_ack = 0;
            return Some(Ack::ack(response_to));
        }

        None
    }
}

fn connect(config: &Config) -> (Transmitter<StreamTransport<DuplexStream>>, DuplexStream) {
    let (host, node) = tokio::io::duplex(16 * 1024);
    let tx = Transmitter::new(StreamTransport::new(host), config.clone()).unwrap();
    (tx, node)
}

#[tokio::test]
async fn test_firmware_image_reaches_node() {
    init_tracing();
    let config = Config::default();
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let data = image(1000);
    let datagram = builder.from_bytes(&data, 1, 3).unwrap();

    let (mut tx, node_stream) = connect(&config);
    let node = SimulatedNode::new(config).spawn(node_stream);

    tx.transmit(&datagram).await.unwrap();
    assert_eq!(tx.stats().frames_sent, 1 + 8);
    assert_eq!(tx.stats().retransmitted_frames, 0);
    drop(tx);

    let completed = node.await.unwrap();
    assert_eq!(completed, vec![(3, Bytes::from(data))]);
}

#[tokio::test]
async fn test_split_image_is_delivered_in_order() {
    init_tracing();
    let config = Config {
        max_packets_per_datagram: 4,
        ..Config::default()
    };
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let data = image(2000);
    let datagrams = builder.split_image(&data, 10, 2).unwrap();
    assert_eq!(datagrams.len(), 4);

    let (mut tx, node_stream) = connect(&config);
    let node = SimulatedNode::new(config).spawn(node_stream);

    tx.transmit_all(&datagrams).await.unwrap();
    assert_eq!(tx.stats().completed_datagrams, 4);
    drop(tx);

    let completed = node.await.unwrap();
    let joined: Vec<u8> = completed.iter().flat_map(|(_, part)| part.to_vec()).collect();
    assert_eq!(joined, data);
}

#[tokio::test]
async fn test_lossy_link_recovers_with_retries() {
    init_tracing();
    let config = Config {
        ack_timeout_ms: 200,
        max_retries: 8,
        ..Config::default()
    };
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let data = image(3000);
    let datagram = builder.from_bytes(&data, 7, 1).unwrap();

    let (mut tx, node_stream) = connect(&config);
    let node = SimulatedNode::new(config).lossy(42, 0.15, 0.1).spawn(node_stream);

    tx.transmit(&datagram).await.unwrap();
    let stats = tx.stats().clone();
    drop(tx);

    let completed = node.await.unwrap();
    assert_eq!(completed, vec![(1, Bytes::from(data))]);
    assert!(stats.total_nacks + stats.timeouts > 0);
    assert_eq!(stats.retransmitted_frames, stats.total_nacks + stats.timeouts);
    assert_eq!(stats.checksum_failures, stats.total_nacks);
}

#[tokio::test]
async fn test_windowed_bulk_transfer() {
    init_tracing();
    let config = Config::bulk_diagnostics();
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let data = image(config.chunk_size * 20 + 5);
    let datagram = builder.build(FrameType::PingData, &data, 3, 9).unwrap();

    let (mut tx, node_stream) = connect(&config);
    let node = SimulatedNode::new(config).spawn(node_stream);

    tx.transmit(&datagram).await.unwrap();
    // 헤더 1 + 윈도우 8, 8, 5
    assert_eq!(tx.stats().total_acks, 4);
    drop(tx);

    let completed = node.await.unwrap();
    assert_eq!(completed, vec![(9, Bytes::from(data))]);
}

#[tokio::test]
async fn test_permanent_nack_exhausts_retries() {
    init_tracing();
    let config = Config {
        max_retries: 2,
        ..Config::default()
    };
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let datagram = builder.from_bytes(&image(300), 5, 1).unwrap();

    let (mut tx, node_stream) = connect(&config);
    let mut node = SimulatedNode::new(config);
    node.always_nack = Some((FLASH_WRITE_FAILED, "flash write failed"));
    let node = node.spawn(node_stream);

    let err = tx.transmit(&datagram).await.unwrap_err();
    match err {
        Error::RetryExhausted {
            datagram_id,
            sequence_num,
            attempts,
            last_failure,
        } => {
            assert_eq!(datagram_id, 5);
            assert_eq!(sequence_num, 0);
            assert_eq!(attempts, 3);
            assert_eq!(
                last_failure,
                FailureReason::Nack {
                    error_code: FLASH_WRITE_FAILED,
                    message: "flash write failed".into(),
                }
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(tx.stats().frames_sent, 3);
    drop(tx);

    assert!(node.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_silent_node_times_out() {
    init_tracing();
    let config = Config {
        ack_timeout_ms: 20,
        max_retries: 1,
        ..Config::default()
    };
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let datagram = builder.from_bytes(&image(10), 1, 1).unwrap();

    let (mut tx, node_stream) = connect(&config);
    let mut node = SimulatedNode::new(config);
    node.silent = true;
    let node = node.spawn(node_stream);

    let started = tokio::time::Instant::now();
    let err = tx.transmit(&datagram).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RetryExhausted {
            attempts: 2,
            last_failure: FailureReason::Timeout,
            ..
        }
    ));
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(tx.stats().timeouts, 2);
    drop(tx);

    assert!(node.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_image_to_several_nodes() {
    init_tracing();
    let config = Config::default();
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let data = image(400);
    let datagram = builder.from_bytes(&data, 20, 1).unwrap();

    let (mut tx, node_stream) = connect(&config);
    let node = SimulatedNode::new(config).spawn(node_stream);

    tx.transmit_to_nodes(&builder, &datagram, &[1, 2, 5]).await.unwrap();
    drop(tx);

    let completed = node.await.unwrap();
    let nodes: Vec<u8> = completed.iter().map(|(node, _)| *node).collect();
    assert_eq!(nodes, vec![1, 2, 5]);
    assert!(completed.iter().all(|(_, part)| part.as_ref() == data.as_slice()));
}

/// 첫 헤더에만 늦게 응답하고 데이터 프레임은 항상 NACK 하는 노드
async fn late_header_node(config: Config, mut stream: DuplexStream, delay: Duration) -> usize {
    let mut decoder = FrameDecoder::from_config(&config);
    let mut headers = 0usize;
    let mut buf = [0u8; 512];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        decoder.push(&buf[..n]);

        while let Some(Ok(frame)) = decoder.next_frame() {
            let reply = if frame.frame_type() == FrameType::Header {
                headers += 1;
                if headers == 1 {
                    tokio::time::sleep(delay).await;
                }
                Ack::ack(FrameType::Header.into())
            } else {
                Ack::nack(frame.frame_type().into(), FLASH_WRITE_FAILED, "flash write failed")
            };
            if stream.write_all(&reply.to_bytes()).await.is_err() {
                return headers;
            }
        }
    }

    headers
}

#[tokio::test]
async fn test_late_header_ack_is_not_taken_for_data_ack() {
    init_tracing();
    let config = Config {
        ack_timeout_ms: 40,
        max_retries: 2,
        ..Config::default()
    };
    let builder = DatagramBuilder::new(config.clone()).unwrap();
    let datagram = builder.from_bytes(&image(10), 4, 1).unwrap();
    assert_eq!(datagram.packets().len(), 1);

    let (mut tx, node_stream) = connect(&config);
    let node = tokio::spawn(late_header_node(config, node_stream, Duration::from_millis(60)));

    // 첫 헤더의 늦은 ACK 가 재전송 헤더의 ACK 로 쓰이고, 재전송 헤더의 ACK 는 한 번 남는다
    let err = tx.transmit(&datagram).await.unwrap_err();
    match err {
        Error::RetryExhausted {
            datagram_id,
            sequence_num,
            last_failure,
            ..
        } => {
            assert_eq!(datagram_id, 4);
            assert_eq!(sequence_num, 1);
            assert!(matches!(
                last_failure,
                FailureReason::Nack {
                    error_code: FLASH_WRITE_FAILED,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(tx.stats().completed_datagrams, 0);
    drop(tx);

    assert_eq!(node.await.unwrap(), 2);
}
