//! Minimal client: one connection, newline-terminated requests, one
//! response line per request read under a deadline.

use bytes::{BufMut, BytesMut};
use crate::config::TransportKind;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Longest response line accepted, newline included.
pub const MAX_RESPONSE_LEN: usize = 64 * 1024;

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to remote server: {0}")]
    Connect(#[source] io::Error),

    #[error("failed to write to remote server: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read server response: {0}")]
    Read(#[source] io::Error),

    #[error("server response timed out")]
    Timeout,

    #[error("server closed the connection")]
    Closed,

    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no {transport} address found for {addr}")]
    NoAddress {
        addr: String,
        transport: TransportKind,
    },

    #[error("server response exceeds {MAX_RESPONSE_LEN} bytes")]
    ResponseTooLarge,
}

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl Client {
    /// Connect to `addr`. `timeout` bounds the connect and every response read.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Connect)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            timeout,
        })
    }

    /// Connect to the first address of `addr` that belongs to `transport`.
    pub async fn connect_with(
        addr: &str,
        transport: TransportKind,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let target = tokio::net::lookup_host(addr)
            .await
            .map_err(|source| ClientError::Resolve {
                addr: addr.to_string(),
                source,
            })?
            .find(|a| transport.accepts(a))
            .ok_or_else(|| ClientError::NoAddress {
                addr: addr.to_string(),
                transport,
            })?;

        Self::connect(target, timeout).await
    }

    /// Send one message and wait for its response.
    pub async fn send(&mut self, message: &str) -> Result<String, ClientError> {
        self.write_line(message).await?;
        self.read_line().await
    }

    /// Write `message` followed by a newline.
    pub async fn write_line(&mut self, message: &str) -> Result<(), ClientError> {
        let mut buf = BytesMut::with_capacity(message.len() + 1);
        buf.extend_from_slice(message.as_bytes());
        buf.put_u8(b'\n');
        self.writer.write_all(&buf).await.map_err(ClientError::Write)
    }

    /// Read one response line, without its newline.
    ///
    /// Bytes that are not valid UTF-8 are replaced.
    pub async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut line = Vec::new();
        let mut limited = (&mut self.reader).take(MAX_RESPONSE_LEN as u64);
        let n = tokio::time::timeout(self.timeout, limited.read_until(b'\n', &mut line))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Read)?;

        if line.last() != Some(&b'\n') {
            if n == MAX_RESPONSE_LEN {
                return Err(ClientError::ResponseTooLarge);
            }
            return Err(ClientError::Closed);
        }
        line.pop();
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_send_writes_newline_and_reads_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello\n");
            stream.write_all(b"ifmmp\n").await.unwrap();
        });

        let mut client = Client::connect(addr, TIMEOUT).await.unwrap();
        assert_eq!(client.send("hello").await.unwrap(), "ifmmp");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(stream);
        });

        let mut client = Client::connect(addr, Duration::from_millis(50)).await.unwrap();
        assert!(matches!(client.send("hi").await, Err(ClientError::Timeout)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"partial").await.unwrap();
        });

        let mut client = Client::connect(addr, TIMEOUT).await.unwrap();
        assert!(matches!(client.read_line().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = stream.write_all(&vec![b'x'; MAX_RESPONSE_LEN * 2]).await;
            // keep the socket open so only the cap can end the read
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let mut client = Client::connect(addr, TIMEOUT).await.unwrap();
        assert!(matches!(client.read_line().await, Err(ClientError::ResponseTooLarge)));
        server.abort();
    }

    #[tokio::test]
    async fn test_response_at_cap_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut line = vec![b'y'; MAX_RESPONSE_LEN - 1];
            line.push(b'\n');
            stream.write_all(&line).await.unwrap();
        });

        let mut client = Client::connect(addr, TIMEOUT).await.unwrap();
        assert_eq!(client.read_line().await.unwrap().len(), MAX_RESPONSE_LEN - 1);
    }

    #[tokio::test]
    async fn test_connect_with_filters_address_family() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addr = format!("127.0.0.1:{port}");

        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        assert!(Client::connect_with(&addr, TransportKind::Tcp4, TIMEOUT).await.is_ok());
        assert!(matches!(
            Client::connect_with(&addr, TransportKind::Tcp6, TIMEOUT).await,
            Err(ClientError::NoAddress { .. })
        ));
    }
}
