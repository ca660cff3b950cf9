//! Framed message I/O over any async byte stream.

use crate::frame::{FrameHeader, encode_frame};
use crate::protocol::Message;
use crate::FRAME_HEADER_SIZE;
use hrd_core::{HeraldError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one message, bounding the whole frame by `timeout`.
///
/// Returns `Ok(None)` if the stream ends cleanly before a frame starts.
pub async fn read_message<R>(reader: &mut R, timeout: Duration) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_message_inner(reader, None)).await {
        Ok(result) => result,
        Err(_) => Err(HeraldError::Timeout("read message")),
    }
}

/// Read one message, waiting indefinitely for the first byte.
///
/// Used on long-lived connections where the peer may stay silent for a long
/// time (subscribers). Once a frame has started, the rest of it must arrive
/// within `frame_timeout`.
pub async fn read_message_idle<R>(reader: &mut R, frame_timeout: Duration) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    read_message_inner(reader, Some(frame_timeout)).await
}

async fn read_message_inner<R>(
    reader: &mut R,
    frame_timeout: Option<Duration>,
) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];

    let n = reader.read(&mut header_buf[..1]).await?;
    if n == 0 {
        return Ok(None);
    }

    let rest = async {
        reader.read_exact(&mut header_buf[1..]).await?;
        let header = FrameHeader::parse(&header_buf)?;

        let mut payload = vec![0u8; header.payload_length as usize];
        reader.read_exact(&mut payload).await?;
        header.validate_payload(&payload)?;

        Message::decode_body(header.kind, &payload)
    };

    let message = match frame_timeout {
        Some(timeout) => tokio::time::timeout(timeout, rest)
            .await
            .map_err(|_| HeraldError::Timeout("read frame"))??,
        None => rest.await?,
    };

    Ok(Some(message))
}

/// Encode and write one message, then flush.
pub async fn write_message<W>(writer: &mut W, message: &Message, timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;

    let write = async {
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok::<(), HeraldError>(())
    };

    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| HeraldError::Timeout("write message"))?
}
