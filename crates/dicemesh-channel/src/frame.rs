//! Outer wire framing: `code(1) || payload_len(4 BE) || payload`.
//!
//! The transport below this layer is a reliable, in-order byte pipe; this
//! module adds frame boundaries and nothing else. Frame payloads are
//! interpreted per code by the channel layer.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ChannelError, Result};

/// Frame type codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameCode {
    HandshakeHello = 1,
    HandshakeAck = 2,
    Data = 3,
    Ack = 4,
    Close = 5,
    Heartbeat = 6,
}

impl FrameCode {
    /// Try to parse from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::HandshakeHello),
            2 => Some(Self::HandshakeAck),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            5 => Some(Self::Close),
            6 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// A frame as read off the wire, code not yet validated.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub code: u8,
    pub payload: Bytes,
}

impl RawFrame {
    /// Interpret the code, or fail with `UnknownFrame`.
    pub fn code(&self) -> Result<FrameCode> {
        FrameCode::from_u8(self.code).ok_or(ChannelError::UnknownFrame(self.code))
    }
}

/// Upper bound on a frame payload. Anything larger is malformed.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, code: FrameCode, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ChannelError::MalformedFrame(format!(
            "payload of {} bytes exceeds limit",
            payload.len()
        )));
    }
    writer.write_all(&[code as u8]).await?;
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. The code is returned raw so the caller can surface
/// unknown codes as a security event without desynchronizing the stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<RawFrame>
where
    R: AsyncRead + Unpin,
{
    let mut code = [0u8; 1];
    reader.read_exact(&mut code).await?;

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(ChannelError::MalformedFrame(format!(
            "declared payload of {len} bytes exceeds limit"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(RawFrame {
        code: code[0],
        payload: Bytes::from(payload),
    })
}
