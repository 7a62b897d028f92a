//! Wire framing: one length-prefixed command, one acknowledgement line.

use crate::{TransportError, TransportResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest command frame accepted, in bytes.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Write a big-endian length prefix followed by the payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> TransportResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write the acknowledgement line: empty for success, otherwise the error.
pub async fn write_ack<W>(writer: &mut W, error: Option<&str>) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = error.map(flatten).unwrap_or_default();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the acknowledgement line; `Some(message)` when the remote reported an error.
pub async fn read_ack<R>(reader: &mut R) -> TransportResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let limit = MAX_FRAME_LEN as u64 + 1;
    let read = (&mut *reader).take(limit).read_line(&mut line).await?;
    if read == 0 {
        return Err(TransportError::ConnectionClosed);
    }
    if read as u64 == limit && !line.ends_with('\n') {
        return Err(TransportError::FrameTooLarge(read));
    }
    let message = line.trim_end_matches(['\n', '\r']);
    if message.is_empty() {
        Ok(None)
    } else {
        Ok(Some(message.to_string()))
    }
}

/// Error strings travel as a single line.
fn flatten(message: &str) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.trim().is_empty() {
        "unspecified error".to_string()
    } else {
        flat
    }
}
