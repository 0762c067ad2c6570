//! Frame Codec
//!
//! Every message on the wire is a single frame:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (Length bytes)   │
//! │ Big-endian u32   │ UTF-8 command text       │
//! └──────────────────┴──────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;

/// Size of the length prefix in bytes
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a frame payload (64 KiB)
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Prepend the 4-byte big-endian length to `payload`.
///
/// # Panics
///
/// If `payload` is longer than `u32::MAX` bytes, which the length prefix
/// cannot express. [`write_frame`] rejects anything above `max_frame` first.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    assert!(
        payload.len() <= u32::MAX as usize,
        "frame payload of {} bytes does not fit a u32 length prefix",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split one complete frame off the front of an in-memory buffer.
///
/// Returns the payload and the remaining bytes.
pub fn decode_frame(buf: &[u8], max_frame: usize) -> Result<(&[u8], &[u8]), FramingError> {
    if buf.len() < HEADER_LEN {
        return Err(FramingError::Truncated {
            expected: HEADER_LEN,
            received: buf.len(),
        });
    }
    let len = declared_len(&buf[..HEADER_LEN], max_frame)?;
    let body = &buf[HEADER_LEN..];
    if body.len() < len {
        return Err(FramingError::Truncated {
            expected: len,
            received: body.len(),
        });
    }
    Ok(body.split_at(len))
}

/// Write `payload` as one frame and flush
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame: usize) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_frame {
        return Err(FramingError::Oversized {
            len: payload.len(),
            max: max_frame,
        });
    }
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one frame from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// The stream is left positioned at the start of the next frame.
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = fill(reader, &mut header).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(FramingError::Truncated {
            expected: HEADER_LEN,
            received: got,
        });
    }

    let len = declared_len(&header, max_frame)?;
    let mut payload = vec![0u8; len];
    let got = fill(reader, &mut payload).await?;
    if got < len {
        return Err(FramingError::Truncated {
            expected: len,
            received: got,
        });
    }
    Ok(Some(payload))
}

fn declared_len(header: &[u8], max_frame: usize) -> Result<usize, FramingError> {
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(header);
    let len = u32::from_be_bytes(raw) as usize;
    if len > max_frame {
        return Err(FramingError::Oversized { len, max: max_frame });
    }
    Ok(len)
}

/// Like `read_exact`, but reports how many bytes arrived before EOF
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_encode_prepends_big_endian_length() {
        let frame = encode_frame(b"broadcast \"go\"");
        assert_eq!(frame.len(), 14 + HEADER_LEN);
        assert_eq!(&frame[..4], &[0, 0, 0, 14]);
        assert_eq!(&frame[4..], b"broadcast \"go\"");
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode_frame(b"");
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_in_memory_leaves_rest() {
        let mut buf = encode_frame(b"one").to_vec();
        buf.extend_from_slice(&encode_frame(b"two"));

        let (first, rest) = decode_frame(&buf, DEFAULT_MAX_FRAME).unwrap();
        assert_eq!(first, b"one");
        let (second, rest) = decode_frame(rest, DEFAULT_MAX_FRAME).unwrap();
        assert_eq!(second, b"two");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_in_memory_truncated() {
        let frame = encode_frame(b"hello");
        let err = decode_frame(&frame[..6], DEFAULT_MAX_FRAME).unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated { expected: 5, received: 2 }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_survives_byte_by_byte_delivery() {
        let (mut tx, mut rx) = tokio::io::duplex(1);
        let payload = "sensor-update \"température\" 21.5".as_bytes().to_vec();
        let frame = encode_frame(&payload);

        let writer = tokio::spawn(async move {
            for byte in frame.iter() {
                tx.write_all(&[*byte]).await.unwrap();
            }
            tx.write_all(&encode_frame(b"next")).await.unwrap();
        });

        let first = read_frame(&mut rx, DEFAULT_MAX_FRAME).await.unwrap();
        assert_eq!(first, Some(payload));
        let second = read_frame(&mut rx, DEFAULT_MAX_FRAME).await.unwrap();
        assert_eq!(second.as_deref(), Some(&b"next"[..]));

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty, DEFAULT_MAX_FRAME).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_partial_header() {
        let mut partial: &[u8] = &[0, 0];
        let err = read_frame(&mut partial, DEFAULT_MAX_FRAME).await.unwrap_err();
        assert!(matches!(err, FramingError::Truncated { expected: 4, received: 2 }));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload() {
        let frame = encode_frame(b"broadcast \"x\"");
        let mut short: &[u8] = &frame[..8];
        let err = read_frame(&mut short, DEFAULT_MAX_FRAME).await.unwrap_err();
        assert!(matches!(err, FramingError::Truncated { expected: 13, received: 4 }));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let header = (DEFAULT_MAX_FRAME as u32 + 1).to_be_bytes();
        let mut cursor: &[u8] = &header;
        let err = read_frame(&mut cursor, DEFAULT_MAX_FRAME).await.unwrap_err();
        assert!(matches!(err, FramingError::Oversized { .. }));
    }

    #[tokio::test]
    async fn test_write_frame_rejects_oversized_payload() {
        let mut sink = Vec::new();
        let err = write_frame(&mut sink, &[b'a'; 16], 8).await.unwrap_err();
        assert!(matches!(err, FramingError::Oversized { len: 16, max: 8 }));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"broadcast \"a\"", DEFAULT_MAX_FRAME).await.unwrap();
        assert_eq!(wire.len(), 13 + HEADER_LEN);

        let mut reader: &[u8] = &wire;
        let payload = read_frame(&mut reader, DEFAULT_MAX_FRAME).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"broadcast \"a\""[..]));
    }
}
