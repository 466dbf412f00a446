//! Framing primitives of the bdd protocol.
//!
//! All lengths are big-endian `u32`. A premature EOF while reading the
//! command header is malformed framing; during an archive stream it means the
//! client went away.

use std::io;

use bdd_core::{IngestError, CONTINUE_SIGNAL, MAX_CHUNK_LEN, MAX_PARAMS_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read the command tag. `None` if the client closed without sending one.
pub async fn read_tag<R>(reader: &mut R) -> Result<Option<u8>, IngestError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_u8().await {
        Ok(tag) => Ok(Some(tag)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(IngestError::Connection(format!("Failed to read command tag: {}", e))),
    }
}

/// Read a length-prefixed parameter record.
pub async fn read_params<R>(reader: &mut R) -> Result<Vec<u8>, IngestError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader
        .read_u32()
        .await
        .map_err(|e| header_error(e, "parameter length"))?;
    if len > MAX_PARAMS_LEN {
        return Err(IngestError::Protocol(format!(
            "parameter record of {} bytes exceeds limit of {}",
            len, MAX_PARAMS_LEN
        )));
    }

    let mut params = vec![0u8; len as usize];
    reader
        .read_exact(&mut params)
        .await
        .map_err(|e| header_error(e, "parameter record"))?;
    Ok(params)
}

/// Read the next compressed chunk of an archive stream.
///
/// Returns `None` on the zero-length terminator.
pub async fn read_chunk<R>(reader: &mut R) -> Result<Option<Vec<u8>>, IngestError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader
        .read_u32()
        .await
        .map_err(|e| stream_error(e, "chunk length"))?;
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_CHUNK_LEN {
        return Err(IngestError::Protocol(format!(
            "chunk of {} bytes exceeds limit of {}",
            len, MAX_CHUNK_LEN
        )));
    }

    let mut chunk = vec![0u8; len as usize];
    reader
        .read_exact(&mut chunk)
        .await
        .map_err(|e| stream_error(e, "chunk"))?;
    Ok(Some(chunk))
}

/// Tell the client it may start streaming.
pub async fn send_continue<W>(writer: &mut W) -> Result<(), IngestError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer
        .write_all(&[CONTINUE_SIGNAL])
        .await
        .map_err(|e| IngestError::Connection(format!("Failed to send continue signal: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| IngestError::Connection(format!("Failed to send continue signal: {}", e)))
}

fn header_error(e: io::Error, what: &str) -> IngestError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        IngestError::Protocol(format!("truncated {}", what))
    } else {
        IngestError::Connection(format!("Failed to read {}: {}", what, e))
    }
}

fn stream_error(e: io::Error, what: &str) -> IngestError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        IngestError::Connection(format!("client disconnected while sending {}", what))
    } else {
        IngestError::Connection(format!("Failed to read {}: {}", what, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_tag_on_empty_stream() {
        let mut input: &[u8] = &[];
        assert_eq!(read_tag(&mut input).await.unwrap(), None);

        let mut input: &[u8] = &[2, 9];
        assert_eq!(read_tag(&mut input).await.unwrap(), Some(2));
        assert_eq!(input, &[9]);
    }

    #[tokio::test]
    async fn test_read_params() {
        let mut input: &[u8] = &[0, 0, 0, 3, b'a', b'b', b'c', 0xff];
        assert_eq!(read_params(&mut input).await.unwrap(), b"abc");
        assert_eq!(input, &[0xff]);
    }

    #[tokio::test]
    async fn test_truncated_params_are_protocol_errors() {
        let mut short_len: &[u8] = &[0, 0];
        assert!(matches!(read_params(&mut short_len).await, Err(IngestError::Protocol(_))));

        let mut short_body: &[u8] = &[0, 0, 0, 5, b'a'];
        assert!(matches!(read_params(&mut short_body).await, Err(IngestError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_params_rejected_before_body() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0xff, 1, 2, 3];
        assert!(matches!(read_params(&mut input).await, Err(IngestError::Protocol(_))));
        assert_eq!(input, &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_read_chunks_until_terminator() {
        let mut input: &[u8] = &[0, 0, 0, 2, 7, 8, 0, 0, 0, 1, 9, 0, 0, 0, 0];
        assert_eq!(read_chunk(&mut input).await.unwrap(), Some(vec![7, 8]));
        assert_eq!(read_chunk(&mut input).await.unwrap(), Some(vec![9]));
        assert_eq!(read_chunk(&mut input).await.unwrap(), None);
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_mid_chunk_is_connection_error() {
        let mut input: &[u8] = &[0, 0, 0, 4, 1, 2];
        assert!(matches!(read_chunk(&mut input).await, Err(IngestError::Connection(_))));

        let mut input: &[u8] = &[0, 0];
        assert!(matches!(read_chunk(&mut input).await, Err(IngestError::Connection(_))));
    }

    #[tokio::test]
    async fn test_send_continue() {
        let mut out = Vec::new();
        send_continue(&mut out).await.unwrap();
        assert_eq!(out, [CONTINUE_SIGNAL]);
    }
}
