//! Frame I/O over async streams.
//!
//! A frame is one [`MessageHeader`] plus its payload bytes. These helpers
//! read and write handshakes and frames over any `AsyncRead`/`AsyncWrite`,
//! so the same code drives TCP sockets and in-memory duplex pipes in tests.
//!
//! # Example
//!
//! ```
//! use dfhack_remote::protocol::{build_frame, MessageHeader, HEADER_SIZE};
//!
//! let bytes = build_frame(&MessageHeader::new(1, 5), b"hello");
//! assert_eq!(bytes.len(), HEADER_SIZE + 5);
//! ```

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{
    HandshakeHeader, MessageHeader, HANDSHAKE_SIZE, HEADER_SIZE, MAX_MESSAGE_SIZE,
};
use crate::error::{RemoteError, Result};

/// Read one handshake header.
pub async fn read_handshake<R>(reader: &mut R) -> Result<HandshakeHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_SIZE];
    reader.read_exact(&mut buf).await?;
    HandshakeHeader::decode(&buf)
        .ok_or_else(|| RemoteError::Handshake("short handshake".to_string()))
}

/// Write one handshake header and flush.
pub async fn write_handshake<W>(writer: &mut W, header: &HandshakeHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message header.
pub async fn read_header<R>(reader: &mut R) -> Result<MessageHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).await?;
    MessageHeader::decode(&buf)
        .ok_or_else(|| RemoteError::Protocol("short message header".to_string()))
}

/// Read exactly `len` payload bytes into `buf`, replacing its contents.
///
/// The buffer's existing capacity is reused.
pub async fn read_payload<R>(reader: &mut R, len: usize, buf: &mut BytesMut) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    buf.resize(len, 0);
    reader.read_exact(&mut buf[..]).await?;
    Ok(())
}

/// Write a header with no payload (failure and quit frames) and flush.
pub async fn write_header<W>(writer: &mut W, header: &MessageHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a header followed by `payload` and flush.
///
/// Rejects payloads over [`MAX_MESSAGE_SIZE`] without writing anything.
/// Header and payload go out through one vectored write where the
/// stream supports it.
pub async fn write_message<W>(writer: &mut W, id: i16, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(RemoteError::MessageTooLarge(payload.len()));
    }

    let header = MessageHeader::new(id, payload.len() as i32).encode();
    let mut frame = Buf::chain(&header[..], payload);
    writer.write_all_buf(&mut frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &MessageHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::reply;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_handshake_roundtrip_over_duplex() {
        let (mut client, mut server) = duplex(64);

        write_handshake(&mut client, &HandshakeHeader::request())
            .await
            .unwrap();
        let received = read_handshake(&mut server).await.unwrap();

        assert_eq!(received, HandshakeHeader::request());
        assert!(received.validate_request().is_ok());
    }

    #[tokio::test]
    async fn test_short_handshake_is_io_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(b"DFHack").await.unwrap();
        drop(client);

        let result = read_handshake(&mut server).await;
        assert!(matches!(result, Err(RemoteError::Io(_))));
    }

    #[tokio::test]
    async fn test_message_then_payload() {
        let (mut client, mut server) = duplex(1024);

        write_message(&mut client, 7, b"payload").await.unwrap();

        let header = read_header(&mut server).await.unwrap();
        assert_eq!(header.id, 7);
        assert_eq!(header.size, 7);

        let mut buf = BytesMut::new();
        read_payload(&mut server, header.payload_len().unwrap(), &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf[..], b"payload");
    }

    #[tokio::test]
    async fn test_write_message_matches_built_frame() {
        let (mut client, mut server) = duplex(1024);
        write_message(&mut client, 3, b"xyz").await.unwrap();
        drop(client);

        let mut written = Vec::new();
        server.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, build_frame(&MessageHeader::new(3, 3), b"xyz"));
    }

    #[tokio::test]
    async fn test_read_payload_reuses_buffer() {
        let (mut client, mut server) = duplex(1024);
        write_message(&mut client, 1, b"ab").await.unwrap();

        let mut buf = BytesMut::with_capacity(512);
        buf.extend_from_slice(b"stale contents");
        let header = read_header(&mut server).await.unwrap();
        read_payload(&mut server, header.size as usize, &mut buf)
            .await
            .unwrap();

        assert_eq!(&buf[..], b"ab");
        assert!(buf.capacity() >= 512);
    }

    #[tokio::test]
    async fn test_write_header_only() {
        let (mut client, mut server) = duplex(64);
        write_header(&mut client, &MessageHeader::quit()).await.unwrap();

        let header = read_header(&mut server).await.unwrap();
        assert_eq!(header.id, reply::QUIT);
    }

    #[tokio::test]
    async fn test_oversized_message_not_written() {
        let (mut client, _server) = duplex(64);
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];

        let result = write_message(&mut client, reply::RESULT, &big).await;
        assert!(matches!(result, Err(RemoteError::MessageTooLarge(_))));
    }

    #[test]
    fn test_build_frame() {
        let header = MessageHeader::new(reply::RESULT, 5);
        let bytes = build_frame(&header, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(MessageHeader::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }
}
