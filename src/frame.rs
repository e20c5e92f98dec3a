//! EOT-terminated response framing.
//!
//! A response is a sequence of raw chunks of at most `max_chunk` bytes followed
//! by exactly one [`EOT`] byte. There is no length prefix: the receiver scans for
//! the sentinel. Payloads containing `0x04` cannot be transported intact; the
//! reader will cut the frame at the first occurrence.

use anyhow::{bail, Result};
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, FramedRead};

use crate::protocol::{EOT, MAX_CHUNK};

/// The peer closed the stream before a frame was complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerClosed;

impl fmt::Display for PeerClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection closed by peer")
    }
}

impl std::error::Error for PeerClosed {}

/// True if `err` (or anything in its chain) is a [`PeerClosed`].
pub fn is_peer_closed(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.downcast_ref::<PeerClosed>().is_some())
}

/// Writes one framed response incrementally.
pub struct FrameWriter<'a, W> {
    inner: &'a mut W,
    max_chunk: usize,
    written: u64,
}

impl<'a, W: AsyncWrite + Unpin> FrameWriter<'a, W> {
    pub fn new(inner: &'a mut W, max_chunk: usize) -> Self {
        Self {
            inner,
            max_chunk: max_chunk.max(1),
            written: 0,
        }
    }

    /// Append payload bytes, split into chunks of at most `max_chunk`.
    pub async fn write_chunked(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.max_chunk) {
            self.inner.write_all(chunk).await?;
            self.written += chunk.len() as u64;
        }
        Ok(())
    }

    /// Terminate the frame with the sentinel.
    pub async fn finish(self) -> Result<u64> {
        self.inner.write_all(&[EOT]).await?;
        self.inner.flush().await?;
        Ok(self.written)
    }
}

/// Send `payload` as a single framed response.
pub async fn send_framed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_chunk: usize,
) -> Result<()> {
    let mut fw = FrameWriter::new(writer, max_chunk);
    fw.write_chunked(payload).await?;
    fw.finish().await?;
    Ok(())
}

/// One decoded piece of a framed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePart {
    /// Payload bytes; a frame may arrive as several of these.
    Data(BytesMut),
    /// The sentinel that closes the current frame.
    End,
}

/// Splits an incoming byte stream at [`EOT`] sentinels.
///
/// Payload is handed out as soon as it is buffered instead of being held until
/// the sentinel arrives, so a large Get reply never sits in memory twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct EotCodec;

impl Decoder for EotCodec {
    type Item = FramePart;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<FramePart>> {
        match src.iter().position(|&b| b == EOT) {
            Some(0) => {
                src.advance(1);
                Ok(Some(FramePart::End))
            }
            Some(pos) => Ok(Some(FramePart::Data(src.split_to(pos)))),
            None if src.is_empty() => Ok(None),
            None => Ok(Some(FramePart::Data(src.split()))),
        }
    }
}

/// Reads framed responses; bytes past a sentinel stay buffered for the next frame.
pub struct FrameReader<R> {
    inner: FramedRead<R, EotCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, MAX_CHUNK + 1)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner: FramedRead::with_capacity(inner, EotCodec, capacity.max(1)),
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Read one complete frame and return the payload before the sentinel.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        self.read_frame_to(&mut payload).await?;
        Ok(payload)
    }

    /// Stream one frame's payload into `sink`; returns the payload length.
    pub async fn read_frame_to<W: AsyncWrite + Unpin>(&mut self, sink: &mut W) -> Result<u64> {
        let mut total = 0u64;
        while let Some(part) = self.inner.next().await {
            match part? {
                FramePart::Data(bytes) => {
                    sink.write_all(&bytes).await?;
                    total += bytes.len() as u64;
                }
                FramePart::End => return Ok(total),
            }
        }
        bail!(PeerClosed)
    }
}
