//! Native messaging framing: a 4-byte little-endian length followed by a
//! UTF-8 JSON document.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BridgeError;

use super::message::FramedMessage;

/// Largest frame accepted from the peer.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Browsers reject host-to-extension messages above 1 MiB.
pub const HOST_TO_BROWSER_MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug)]
pub enum FrameRead {
    Message(FramedMessage),
    /// The frame was consumed but could not be used. The stream is still in
    /// sync and the next read starts at a frame boundary.
    Malformed(String),
    Eof,
}

pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<FrameRead, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::Eof),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(FrameRead::Malformed("received empty frame (length = 0)".to_string()));
    }

    if len > max_len {
        let mut oversized = (&mut *reader).take(len as u64);
        let drained = tokio::io::copy(&mut oversized, &mut tokio::io::sink()).await?;
        if drained < len as u64 {
            return Ok(FrameRead::Eof);
        }
        return Ok(FrameRead::Malformed(format!(
            "frame too large: {len} bytes (limit {max_len} bytes)"
        )));
    }

    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::Eof),
        Err(err) => return Err(err.into()),
    }

    match serde_json::from_slice::<FramedMessage>(&body) {
        Ok(message) => Ok(FrameRead::Message(message)),
        Err(err) => Ok(FrameRead::Malformed(format!("invalid frame json: {err}"))),
    }
}

pub async fn write_frame<W>(
    writer: &mut W,
    message: &FramedMessage,
    max_len: usize,
) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let len = body.len();
    if len > max_len || len > u32::MAX as usize {
        return Err(BridgeError::FrameTooLarge {
            len,
            limit: max_len,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
