//! 데이터그램 (헤더 프레임 + 순서대로 나열된 payload 프레임)
//!
//! 헤더 payload 형식 (20 bytes, LE):
//!
//! | field          | size |
//! |----------------|------|
//! | target_node    | 1    |
//! | type           | 1    |
//! | num_packets    | 2    |
//! | datagram_id    | 4    |
//! | total_length   | 4    |
//! | datagram_crc32 | 4    |
//! | packet_crc32   | 4    |
//!
//! packet_crc32 는 packet_crc32 필드를 제외한 앞 16바이트에 대한 체크섬이다.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::checksum::ChecksumEngine;
use crate::config::{Config, FrameLimits};
use crate::error::{ConstructionError, ParseError, Result};
use crate::frame::{Frame, FrameType};
use crate::HEADER_PAYLOAD_SIZE;

/// 헤더 type 필드 고정값
pub const HEADER_TYPE: u8 = 0;

/// 데이터그램 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    target_node: u8,
    num_packets: u16,
    datagram_id: u32,
    total_length: u32,
    datagram_crc32: u32,
    packet_crc32: u32,
}

impl DatagramHeader {
    /// 새 헤더 생성 (packet_crc32 계산 포함)
    pub fn new(
        target_node: u8,
        num_packets: u16,
        datagram_id: u32,
        total_length: u32,
        datagram_crc32: u32,
        engine: &ChecksumEngine,
    ) -> Self {
        let mut header = Self {
            target_node,
            num_packets,
            datagram_id,
            total_length,
            datagram_crc32,
            packet_crc32: 0,
        };
        header.packet_crc32 = header.compute_packet_crc(engine);
        header
    }

    pub fn target_node(&self) -> u8 {
        self.target_node
    }

    pub fn header_type(&self) -> u8 {
        HEADER_TYPE
    }

    pub fn num_packets(&self) -> u16 {
        self.num_packets
    }

    pub fn datagram_id(&self) -> u32 {
        self.datagram_id
    }

    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    pub fn datagram_crc32(&self) -> u32 {
        self.datagram_crc32
    }

    pub fn packet_crc32(&self) -> u32 {
        self.packet_crc32
    }

    /// 임의의 packet_crc32 로 헤더 payload 직렬화
    fn encode_with(&self, packet_crc32: u32) -> [u8; HEADER_PAYLOAD_SIZE] {
        let mut out = [0u8; HEADER_PAYLOAD_SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(self.target_node);
        buf.put_u8(HEADER_TYPE);
        buf.put_u16_le(self.num_packets);
        buf.put_u32_le(self.datagram_id);
        buf.put_u32_le(self.total_length);
        buf.put_u32_le(self.datagram_crc32);
        buf.put_u32_le(packet_crc32);
        out
    }

    fn compute_packet_crc(&self, engine: &ChecksumEngine) -> u32 {
        let zeroed = self.encode_with(0);
        engine.checksum(&zeroed[..HEADER_PAYLOAD_SIZE - 4])
    }

    /// 헤더 payload 직렬화
    pub fn encode(&self) -> [u8; HEADER_PAYLOAD_SIZE] {
        self.encode_with(self.packet_crc32)
    }

    /// 헤더 payload 역직렬화 및 packet_crc32 검증
    pub fn decode(payload: &[u8], engine: &ChecksumEngine) -> Result<Self> {
        if payload.len() != HEADER_PAYLOAD_SIZE {
            return Err(ParseError::LengthMismatch {
                declared: HEADER_PAYLOAD_SIZE,
                actual: payload.len(),
            }
            .into());
        }

        let mut cursor = payload;
        let target_node = cursor.get_u8();
        let header_type = cursor.get_u8();
        if header_type != HEADER_TYPE {
            return Err(ParseError::NotAHeader(header_type, 0).into());
        }

        let header = Self {
            target_node,
            num_packets: cursor.get_u16_le(),
            datagram_id: cursor.get_u32_le(),
            total_length: cursor.get_u32_le(),
            datagram_crc32: cursor.get_u32_le(),
            packet_crc32: cursor.get_u32_le(),
        };

        let expected = header.compute_packet_crc(engine);
        if expected != header.packet_crc32 {
            return Err(ParseError::HeaderChecksum {
                expected,
                got: header.packet_crc32,
            }
            .into());
        }

        Ok(header)
    }

    /// 저장된 packet_crc32 가 현재 필드와 일치하는지 확인
    pub fn verify(&self, engine: &ChecksumEngine) -> bool {
        self.compute_packet_crc(engine) == self.packet_crc32
    }

    /// 헤더 프레임 (sequence_num = 0)
    pub fn to_frame(&self, limits: &FrameLimits, engine: &ChecksumEngine) -> Result<Frame> {
        Ok(Frame::new(
            FrameType::Header,
            self.datagram_id,
            0,
            Bytes::copy_from_slice(&self.encode()),
            limits,
            engine,
        )?)
    }
}

/// 데이터그램
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    header: DatagramHeader,
    header_frame: Frame,
    packets: Vec<Frame>,
}

impl Datagram {
    pub fn header(&self) -> &DatagramHeader {
        &self.header
    }

    pub fn header_frame(&self) -> &Frame {
        &self.header_frame
    }

    /// payload 프레임 (sequence 순서)
    pub fn packets(&self) -> &[Frame] {
        &self.packets
    }

    pub fn datagram_id(&self) -> u32 {
        self.header.datagram_id
    }

    pub fn target_node(&self) -> u8 {
        self.header.target_node
    }

    /// 헤더 프레임 다음 payload 프레임 순서로 순회
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::once(&self.header_frame).chain(self.packets.iter())
    }

    /// payload 연결 (원본 소스 복원)
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.total_length as usize);
        for packet in &self.packets {
            buf.extend_from_slice(packet.payload());
        }
        buf.freeze()
    }

    /// 와이어 상 총 바이트 수
    pub fn wire_len(&self) -> usize {
        self.frames().map(Frame::wire_len).sum()
    }
}

/// 데이터그램 생성기 (송신측)
#[derive(Debug, Clone)]
pub struct DatagramBuilder {
    config: Config,
    engine: ChecksumEngine,
}

impl DatagramBuilder {
    pub fn new(config: Config) -> std::result::Result<Self, ConstructionError> {
        config.validate()?;
        let engine = ChecksumEngine::new(config.polynomial);
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &ChecksumEngine {
        &self.engine
    }

    /// 펌웨어 데이터를 데이터그램으로 분할
    pub fn from_bytes(&self, source: &[u8], datagram_id: u32, target_node: u8) -> Result<Datagram> {
        self.build(FrameType::Data, source, datagram_id, target_node)
    }

    /// 스트림을 chunk_size 단위로 읽어 데이터그램 생성
    pub fn from_reader<R: Read>(
        &self,
        mut reader: R,
        datagram_id: u32,
        target_node: u8,
    ) -> Result<Datagram> {
        let chunk_size = self.config.chunk_size;
        let mut chunks = Vec::new();

        loop {
            let mut chunk = Vec::with_capacity(chunk_size);
            (&mut reader).take(chunk_size as u64).read_to_end(&mut chunk)?;
            if chunk.is_empty() {
                break;
            }
            chunks.push(Bytes::from(chunk));
        }

        self.assemble(FrameType::Data, chunks, datagram_id, target_node)
    }

    /// 지정 프레임 타입으로 데이터그램 생성 (명령 계층용)
    pub fn build(
        &self,
        frame_type: FrameType,
        source: &[u8],
        datagram_id: u32,
        target_node: u8,
    ) -> Result<Datagram> {
        let chunks = source
            .chunks(self.config.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        self.assemble(frame_type, chunks, datagram_id, target_node)
    }

    /// payload 없는 제어 프레임 하나만 담은 데이터그램
    ///
    /// 헤더 프레임의 frame_type 은 항상 Header 이므로 명령 종류는 빈 payload 프레임으로 전달한다.
    pub fn control(&self, frame_type: FrameType, datagram_id: u32, target_node: u8) -> Result<Datagram> {
        self.assemble(frame_type, vec![Bytes::new()], datagram_id, target_node)
    }

    /// 큰 이미지를 연속 datagram_id 를 가진 여러 데이터그램으로 분할
    ///
    /// 빈 이미지는 payload 프레임이 없는 데이터그램 하나가 된다.
    pub fn split_image(&self, image: &[u8], first_id: u32, target_node: u8) -> Result<Vec<Datagram>> {
        let span = self.config.chunk_size * self.config.packets_per_datagram();

        if image.is_empty() {
            return Ok(vec![self.from_bytes(image, first_id, target_node)?]);
        }

        let datagrams = image
            .chunks(span)
            .enumerate()
            .map(|(idx, part)| self.from_bytes(part, first_id.wrapping_add(idx as u32), target_node))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "이미지 {} bytes -> 데이터그램 {}개 (id {}..)",
            image.len(),
            datagrams.len(),
            first_id
        );

        Ok(datagrams)
    }

    /// 대상 노드만 바꾼 새 데이터그램 (헤더 CRC 재계산)
    pub fn retarget(&self, datagram: &Datagram, target_node: u8) -> Result<Datagram> {
        let old = datagram.header;
        let header = DatagramHeader::new(
            target_node,
            old.num_packets,
            old.datagram_id,
            old.total_length,
            old.datagram_crc32,
            &self.engine,
        );
        let header_frame = header.to_frame(&self.config.frame_limits(), &self.engine)?;

        Ok(Datagram {
            header,
            header_frame,
            packets: datagram.packets.clone(),
        })
    }

    fn assemble(
        &self,
        frame_type: FrameType,
        chunks: Vec<Bytes>,
        datagram_id: u32,
        target_node: u8,
    ) -> Result<Datagram> {
        let max_packets = self.config.packets_per_datagram();
        if chunks.len() > max_packets {
            return Err(ConstructionError::TooManyPackets {
                count: chunks.len(),
                max: max_packets,
            }
            .into());
        }

        let limits = self.config.frame_limits();
        let mut packets = Vec::with_capacity(chunks.len());
        let mut concatenated = BytesMut::new();
        let mut total_length: usize = 0;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            total_length += chunk.len();
            concatenated.extend_from_slice(&chunk);
            packets.push(Frame::new(
                frame_type,
                datagram_id,
                idx as u32 + 1,
                chunk,
                &limits,
                &self.engine,
            )?);
        }

        let total_length = u32::try_from(total_length)
            .map_err(|_| ConstructionError::ImageTooLarge { len: total_length })?;
        let datagram_crc32 = self.engine.checksum(&concatenated);

        let header = DatagramHeader::new(
            target_node,
            packets.len() as u16,
            datagram_id,
            total_length,
            datagram_crc32,
            &self.engine,
        );
        let header_frame = header.to_frame(&limits, &self.engine)?;

        Ok(Datagram {
            header,
            header_frame,
            packets,
        })
    }
}
