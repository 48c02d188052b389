// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport boundary: an abstract duplex byte stream plus a connector
//! that can establish one.
//!
//! The engine reacts to transport activity (bytes, EOF, errors) but never
//! defines the byte-stream implementation. [`TcpConnector`] is the
//! production implementation; tests substitute mocks that script connect
//! outcomes and capture writes.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::resource::DnsResolver;

// ============================================================================
// Addresses
// ============================================================================

/// A remote endpoint identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteAddr {
    /// Host name or IP literal.
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl RemoteAddr {
    /// Create an address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Transport traits
// ============================================================================

/// Abstraction over duplex byte streams (TCP today, TLS-wrapped later).
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Type alias for a boxed transport.
pub type BoxedTransport = Box<dyn Transport>;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<BoxedTransport>> + Send + 'a>>;

/// Establishes transports to a remote endpoint.
///
/// Called for the initial connect and for every reconnect attempt; the
/// connector owns address resolution and socket configuration.
pub trait Connector: Send + Sync + 'static {
    /// Establish a transport to `addr`.
    fn connect<'a>(&'a self, addr: &'a RemoteAddr) -> ConnectFuture<'a>;
}

// ============================================================================
// TCP connector
// ============================================================================

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Production TCP connector.
pub struct TcpConnector {
    resolver: Arc<dyn DnsResolver>,
    connect_timeout: Duration,
    nodelay: bool,
}

impl TcpConnector {
    /// Create a connector using the given resolver.
    pub fn new(resolver: Arc<dyn DnsResolver>, connect_timeout: Duration) -> Self {
        Self {
            resolver,
            connect_timeout,
            nodelay: true,
        }
    }

    /// Control `TCP_NODELAY` on established sockets (on by default).
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, addr: &'a RemoteAddr) -> ConnectFuture<'a> {
        Box::pin(async move {
            let ips: Vec<IpAddr> = match addr.host.parse::<IpAddr>() {
                Ok(ip) => vec![ip],
                Err(_) => self.resolver.resolve(&addr.host)?,
            };
            if ips.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses resolved for {}", addr.host),
                ));
            }

            let mut last_err = None;
            for ip in ips {
                let attempt = TcpStream::connect((ip, addr.port));
                match tokio::time::timeout(self.connect_timeout, attempt).await {
                    Ok(Ok(stream)) => {
                        if self.nodelay {
                            // Small request/reply frames; Nagle only adds latency.
                            stream.set_nodelay(true)?;
                        }
                        return Ok(Box::new(stream) as BoxedTransport);
                    }
                    Ok(Err(err)) => last_err = Some(err),
                    Err(_) => {
                        last_err = Some(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("connect to {} timed out", addr),
                        ));
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "connect failed")
            }))
        })
    }
}

// ============================================================================
// Test mocks
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mock::{MockConnector, MockTransport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn remote_addr_display() {
        let addr = RemoteAddr::new("example.com", 6379);
        assert_eq!(addr.to_string(), "example.com:6379");
    }

    #[tokio::test]
    async fn mock_transport_reads_fed_data() {
        let (mut transport, remote) = MockTransport::pair();
        remote.feed(b"hello");

        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn mock_transport_captures_writes() {
        let (mut transport, remote) = MockTransport::pair();
        transport.write_all(b"abc").await.unwrap();
        transport.write_all(b"def").await.unwrap();

        assert_eq!(remote.writes().len(), 2);
        assert_eq!(remote.written_bytes(), b"abcdef");
    }

    #[tokio::test]
    async fn mock_transport_eof_after_close() {
        let (mut transport, remote) = MockTransport::pair();
        remote.close();

        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "closed stream reads as EOF");
    }

    #[tokio::test]
    async fn mock_connector_scripts_failures() {
        let connector = MockConnector::failing(2);
        let addr = RemoteAddr::new("127.0.0.1", 1);

        assert!(connector.connect(&addr).await.is_err());
        assert!(connector.connect(&addr).await.is_err());
        assert!(connector.connect(&addr).await.is_ok());
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.connects(), 1);
    }
}
