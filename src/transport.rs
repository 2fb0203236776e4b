//! 바이트 전송 계층
//!
//! 직렬 포트, CAN 게이트웨이 등 실제 물리 계층은 이 트레잇 뒤에 숨는다.

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::ACK_RECORD_SIZE;

/// 송수신 1:1 바이트 채널
pub trait Transport {
    /// 바이트 전체를 쓰고 flush 할 때까지 대기
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// 응답 단위 하나를 timeout 내에 읽음, 시간 초과 시 `None`
    fn read(&mut self, timeout: Duration) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// 버퍼에 남았거나 이미 도착해 있는 바이트를 대기 없이 버림, 버린 바이트 수 반환
    fn discard(&mut self) -> impl Future<Output = Result<usize>> + Send;
}

/// tokio 스트림 기반 전송 계층
///
/// 응답은 고정 길이(`record_len`) 레코드로 읽는다. 타임아웃 시점까지 읽은 부분 데이터는
/// 버퍼에 남아 다음 read 에 이어 붙으므로 스트림 정렬이 깨지지 않는다.
pub struct StreamTransport<S> {
    stream: S,
    buf: BytesMut,
    record_len: usize,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// ACK 레코드 크기로 읽는 전송 계층
    pub fn new(stream: S) -> Self {
        Self::with_record_len(stream, ACK_RECORD_SIZE)
    }

    pub fn with_record_len(stream: S, record_len: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(record_len * 2),
            record_len,
        }
    }

    /// 아직 레코드로 소비되지 않은 바이트 수
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await?;
            trace!("{} bytes 전송", bytes.len());
            Ok(())
        }
    }

    fn read(&mut self, timeout: Duration) -> impl Future<Output = Result<Option<Bytes>>> + Send {
        async move {
            let deadline = tokio::time::Instant::now() + timeout;

            while self.buf.len() < self.record_len {
                // read_buf 는 취소되어도 이미 읽은 바이트를 잃지 않음
                match tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.buf)).await {
                    Err(_) => return Ok(None),
                    Ok(Ok(0)) => return Err(Error::ConnectionClosed),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                }
            }

            Ok(Some(self.buf.split_to(self.record_len).freeze()))
        }
    }

    fn discard(&mut self) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut dropped = self.buf.len();
            self.buf.clear();

            // 타임아웃 0: 즉시 읽을 수 있는 바이트만 소비
            loop {
                match tokio::time::timeout(Duration::ZERO, self.stream.read_buf(&mut self.buf)).await {
                    Err(_) | Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        dropped += n;
                        self.buf.clear();
                    }
                    Ok(Err(e)) => return Err(e.into()),
                }
            }

            if dropped > 0 {
                trace!("{} bytes 폐기", dropped);
            }
            Ok(dropped)
        }
    }
}
