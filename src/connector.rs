//! Backend TCP connection management.
//!
//! A connector owns the target address and produces one connection attempt at
//! a time. Each attempt resolves to exactly one of connected or error; a live
//! connection then emits data until it ends or errors. The session guarantees
//! at most one live connection by dropping the previous halves before asking
//! for a new attempt.

use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Factory for backend connection attempts.
#[derive(Debug, Clone)]
pub struct BackendConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl BackendConnector {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    /// Target address as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Starts one connection attempt.
    ///
    /// Resolves to a connected [`BackendConn`] or a single error; a timeout
    /// counts as a connect failure.
    pub async fn connect(&self) -> std::io::Result<BackendConn> {
        let addr = self.addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )
            })??;

        // Remote-display traffic is latency sensitive; small input events must
        // not sit behind Nagle.
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        Ok(BackendConn {
            read_half,
            write_half,
        })
    }
}

/// A live backend connection, split for independent read/write use inside the
/// session loop. Dropping it releases the socket; dropping twice is a non-issue
/// because ownership moves out of the session on teardown.
#[derive(Debug)]
pub struct BackendConn {
    pub read_half: OwnedReadHalf,
    pub write_half: OwnedWriteHalf,
}

impl BackendConn {
    /// Splits into halves for separate select-arm ownership.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        (self.read_half, self.write_half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_addr_format() {
        let c = BackendConnector::new("127.0.0.1", 5901, Duration::from_secs(1));
        assert_eq!(c.addr(), "127.0.0.1:5901");
    }

    #[tokio::test]
    async fn test_connect_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
        });

        let connector = BackendConnector::new("127.0.0.1", port, Duration::from_secs(5));
        let conn = connector.connect().await.unwrap();
        let (_read, mut write) = conn.into_split();
        write.write_all(b"hello").await.unwrap();

        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        // Bind then drop to get a port that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = BackendConnector::new("127.0.0.1", port, Duration::from_secs(5));
        assert!(connector.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_replacing_connection_releases_previous() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let (_second, _) = listener.accept().await.unwrap();
            // First socket sees EOF once the session drops its halves.
            let mut buf = [0u8; 1];
            assert_eq!(first.read(&mut buf).await.unwrap(), 0);
        });

        let connector = BackendConnector::new("127.0.0.1", port, Duration::from_secs(5));
        let first = connector.connect().await.unwrap();
        drop(first);
        let _second = connector.connect().await.unwrap();

        accept.await.unwrap();
    }
}
