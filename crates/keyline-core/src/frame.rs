//! Length-prefixed framing.
//!
//! One frame carries exactly one JSON message:
//!
//! ```text
//! +-------------------+---------------------------+
//! | Length (u32, BE)  | Payload                   |
//! +-------------------+---------------------------+
//! ```
//!
//! The sender does not enforce [`MAX_FRAME_LEN`]; the receiver rejects any
//! length of zero or above the ceiling before allocating.

use std::io::ErrorKind;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{LENGTH_PREFIX_SIZE, MAX_FRAME_LEN};

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the stream before a full prefix or payload arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// Length prefix was zero or above the ceiling.
    #[error("invalid frame length: {0}")]
    InvalidLength(u64),

    /// Payload was not valid UTF-8 JSON of the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream is still aligned on a frame boundary.
    ///
    /// Only payload parse failures leave the stream usable: the full
    /// payload has been consumed, so the next read starts a new frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedPayload(_))
    }
}

impl From<FrameError> for keyline_common::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::Transport(e),
            FrameError::MalformedPayload(msg) => Self::MalformedPayload(msg),
            other => Self::framing(other),
        }
    }
}

/// Serialize `message` and prefix it with its length.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, FrameError> {
    let payload =
        serde_json::to_vec(message).map_err(|e| FrameError::MalformedPayload(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::InvalidLength(payload.len() as u64))?;

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(len);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode one frame from the front of `data`.
///
/// Returns the message and the number of bytes consumed, or `None` if
/// `data` does not yet hold a complete frame.
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<Option<(T, usize)>, FrameError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    check_length(len)?;

    let end = LENGTH_PREFIX_SIZE + len as usize;
    if data.len() < end {
        return Ok(None);
    }

    let message = parse_payload(&data[LENGTH_PREFIX_SIZE..end])?;
    Ok(Some((message, end)))
}

/// Read exactly one frame from `reader`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_exact_or_closed(reader, &mut prefix).await?;

    let len = u32::from_be_bytes(prefix);
    check_length(len)?;

    let mut payload = vec![0u8; len as usize];
    read_exact_or_closed(reader, &mut payload).await?;

    parse_payload(&payload)
}

/// Encode `message` and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_frame(message)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn check_length(len: u32) -> Result<(), FrameError> {
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(FrameError::InvalidLength(len as u64));
    }
    Ok(())
}

fn parse_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    let text =
        std::str::from_utf8(payload).map_err(|e| FrameError::MalformedPayload(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| FrameError::MalformedPayload(e.to_string()))
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(FrameError::ConnectionClosed),
        Err(e) => Err(FrameError::Io(e)),
    }
}
