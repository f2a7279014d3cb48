//! Outbound IRC connections.
//!
//! A [`Connector`] resolves the hostname, filters candidate addresses
//! by the enabled address families, establishes the TCP stream (plus
//! the TLS client handshake when requested) and wraps the result in a
//! line-framed stream.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::codec::IrcCodec;

/// Errors produced while establishing a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// Name resolution failed or yielded no usable address.
    #[error("resolve failed: {0}")]
    ResolveFailed(String),

    /// All candidate addresses refused the connection.
    #[error("connect failed: {0}")]
    ConnectFailed(io::Error),

    /// The TLS handshake failed.
    #[error("tls handshake failed: {0}")]
    TlsFailed(String),

    /// The attempt did not complete within the deadline.
    #[error("connect timed out")]
    Timeout,
}

/// A plain or TLS-wrapped TCP stream.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum MaybeTls {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl AsyncRead for MaybeTls {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            MaybeTls::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTls {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTls::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            MaybeTls::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            MaybeTls::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            MaybeTls::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A line-framed IRC stream.
pub type IrcStream = Framed<MaybeTls, IrcCodec>;

/// Connection parameters independent of the server identity.
#[derive(Clone, Copy, Debug)]
pub struct Connector {
    /// Allow IPv4 addresses.
    pub ipv4: bool,
    /// Allow IPv6 addresses.
    pub ipv6: bool,
    /// Perform a client-side TLS handshake after connecting.
    pub tls: bool,
}

impl Connector {
    fn family_allows(&self, addr: &SocketAddr) -> bool {
        match addr {
            SocketAddr::V4(_) => self.ipv4,
            SocketAddr::V6(_) => self.ipv6,
        }
    }

    /// Resolve `host:port` and connect to the first address that
    /// accepts, honoring the family selection.
    pub async fn connect(&self, host: &str, port: u16) -> Result<IrcStream, ConnectError> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ConnectError::ResolveFailed(e.to_string()))?
            .filter(|a| self.family_allows(a))
            .collect::<Vec<_>>();

        if addrs.is_empty() {
            return Err(ConnectError::ResolveFailed(format!(
                "no usable address for {}",
                host
            )));
        }

        let mut last_error = None;

        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(e) = enable_keepalive(&stream) {
                        warn!("failed to enable TCP keepalive: {}", e);
                    }

                    let stream = if self.tls {
                        tls_handshake(host, stream).await?
                    } else {
                        MaybeTls::Tcp(stream)
                    };

                    return Ok(Framed::new(stream, IrcCodec));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(ConnectError::ConnectFailed(last_error.unwrap_or_else(
            || io::Error::new(io::ErrorKind::Other, "no address attempted"),
        )))
    }
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));

    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

#[cfg(feature = "tls")]
async fn tls_handshake(host: &str, stream: TcpStream) -> Result<MaybeTls, ConnectError> {
    use std::sync::Arc;

    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let name = ServerName::try_from(host.to_owned())
        .map_err(|e| ConnectError::TlsFailed(e.to_string()))?;

    let tls = TlsConnector::from(Arc::new(config))
        .connect(name, stream)
        .await
        .map_err(|e| ConnectError::TlsFailed(e.to_string()))?;

    Ok(MaybeTls::Tls(tls))
}

#[cfg(not(feature = "tls"))]
async fn tls_handshake(_host: &str, _stream: TcpStream) -> Result<MaybeTls, ConnectError> {
    Err(ConnectError::TlsFailed("ssl is disabled".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_family_filter_rejects_everything() {
        let connector = Connector {
            ipv4: false,
            ipv6: false,
            tls: false,
        };

        // Resolution succeeds for localhost but no family is allowed.
        let err = connector.connect("127.0.0.1", 6667).await.unwrap_err();
        assert!(matches!(err, ConnectError::ResolveFailed(_)));
    }

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = Connector {
            ipv4: true,
            ipv6: false,
            tls: false,
        };

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = connector.connect("127.0.0.1", addr.port()).await;

        assert!(stream.is_ok());
        accept.await.unwrap();
    }
}
