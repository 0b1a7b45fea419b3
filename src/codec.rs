//! Length-prefixed frame codec
//!
//! A frame is an 8-byte little-endian length followed by exactly that many
//! bytes of JSON-encoded [`Message`]. A length of zero is a termination
//! signal and is reported exactly like end-of-stream.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChatError;
use crate::message::Message;

/// Size of the length prefix in bytes
pub const PREFIX_LEN: usize = 8;

/// Encode a message into a complete frame (prefix + payload)
pub fn encode(message: &Message) -> Result<Vec<u8>, ChatError> {
    let payload = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parse a frame payload (without its prefix)
pub fn decode_payload(payload: &[u8]) -> Result<Message, ChatError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read one frame from the stream and decode it.
///
/// `max_len` lets the caller cap the payload size before anything is
/// allocated; the codec itself accepts any length.
pub async fn read_frame<R>(reader: &mut R, max_len: Option<u64>) -> Result<Message, ChatError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    read_exact_or_closed(reader, &mut prefix).await?;

    let len = u64::from_le_bytes(prefix);
    if len == 0 {
        return Err(ChatError::ConnectionClosed);
    }
    if let Some(max) = max_len {
        if len > max {
            return Err(ChatError::FrameTooLarge { len, max });
        }
    }

    let len = usize::try_from(len).map_err(|_| ChatError::FrameTooLarge {
        len,
        max: usize::MAX as u64,
    })?;
    let mut payload = vec![0u8; len];
    read_exact_or_closed(reader, &mut payload).await?;

    decode_payload(&payload)
}

/// Encode and write one frame, flushing afterwards
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), ChatError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    // write_all loops over partial writes until the whole frame is out
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ChatError::ConnectionClosed),
        Err(e) => Err(ChatError::ConnectionIo(e)),
    }
}
