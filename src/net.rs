use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wire framing for client connections.
///
/// Every message on the wire is:
///
/// ```text
/// [4-byte big-endian body length][4-byte big-endian request id][body bytes]
/// ```
///
/// The body is UTF-8: a command string on the way in, a JSON document on
/// the way out. Multi-chunk logical responses reuse one request id across
/// their chunks; server-initiated pub/sub events use request id 0 since
/// they are not replies to any client request.

/// Upper bound on a single frame body. Anything larger is treated as a
/// corrupt stream and terminates the connection.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Reads one frame, returning the request id and the body bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u32, Vec<u8>)> {
    let len = reader.read_u32().await?;
    let request_id = reader.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        bail!("frame of {} bytes exceeds maximum of {}", len, MAX_FRAME_SIZE);
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok((request_id, body))
}

/// Writes one frame: header followed by the body.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request_id: u32,
    body: &[u8],
) -> Result<()> {
    writer.write_u32(body.len() as u32).await?;
    writer.write_u32(request_id).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
