//! Length-prefixed framing
//!
//! Every message on the socket is a 4-byte big-endian length followed by
//! that many payload bytes. The length is checked before any allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::IpcError;

/// Largest frame either side will send or accept.
///
/// Room for a maximum-size snapshot plus the response envelope.
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Read one frame. `Ok(None)` means the peer closed the stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_in_sequence() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);

        write_frame(&mut a, b"first").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        write_frame(&mut a, b"third").await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"first");
        assert!(read_frame(&mut b).await.unwrap().unwrap().is_empty());
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"third");
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        a.write_all(&len).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, IpcError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        assert!(matches!(read_frame(&mut b).await, Err(IpcError::Io(_))));
    }

    #[tokio::test]
    async fn test_write_refuses_oversized_payload() {
        let (mut a, _b) = tokio::io::duplex(64);
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            write_frame(&mut a, &big).await,
            Err(IpcError::FrameTooLarge { .. })
        ));
    }
}
