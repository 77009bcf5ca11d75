//! Wire framing: `[u32 length LE][u8 type][length bytes payload]`.

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

/// Reads one header-then-body frame. Returns `Ok(None)` on a clean EOF
/// before any header bytes arrive (the remote closed the connection);
/// any other short read is an I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Option<RawFrame>> {
    let mut header = [0u8; HEADER_LEN];
    match r.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let kind = header[4];
    let mut payload = vec![0u8; length];
    r.read_exact(&mut payload).await?;
    Ok(Some(RawFrame { kind, payload }))
}

/// Writes header and body as a single logical write. Both buffers are
/// flushed from one task in this implementation, so distinct frames from
/// the same writer never interleave.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, kind: u8, payload: &[u8]) -> io::Result<()> {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4] = kind;
    w.write_all(&header).await?;
    w.write_all(payload).await?;
    w.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frame_round_trips_through_a_buffer() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 7, b"hello").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.kind, 7);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn empty_stream_reads_as_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1, b"abcd").await.unwrap();
        buf.truncate(HEADER_LEN + 2);
        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
