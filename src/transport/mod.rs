//! The control-plane transport.
//!
//! A transport server wraps an acceptor (TCP, TLS-on-TCP or a local
//! stream socket) and spawns a client task per accepted connection.
//! Clients talk the `\r\n\r\n`-separated JSON protocol and, once
//! ready, receive every broadcast event.

pub mod client;
pub(crate) mod command;
pub mod frame;

use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::bot::ControlMessage;
use crate::error::TransportError;

pub use client::ClientHandle;

/// Declarative description of a transport endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportSpec {
    /// TCP, optionally with TLS.
    Ip(IpTransport),
    /// Local stream socket.
    Unix(UnixTransport),
}

/// A TCP (or TLS-on-TCP) endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IpTransport {
    /// Bind address; defaults to the wildcard of the selected family.
    pub address: Option<String>,
    /// Port to listen on, 1..=65535.
    pub port: u64,
    /// Accept IPv4.
    pub ipv4: bool,
    /// Accept IPv6.
    pub ipv6: bool,
    /// Require this password from every client.
    pub password: Option<String>,
    /// PEM certificate chain; enables TLS together with `key`.
    pub certificate: Option<String>,
    /// PEM private key; enables TLS together with `certificate`.
    pub key: Option<String>,
}

impl Default for IpTransport {
    fn default() -> Self {
        IpTransport {
            address: None,
            port: 0,
            ipv4: true,
            ipv6: true,
            password: None,
            certificate: None,
            key: None,
        }
    }
}

/// A local stream socket endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct UnixTransport {
    /// Filesystem path of the socket.
    pub path: String,
    /// Require this password from every client.
    #[serde(default)]
    pub password: Option<String>,
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(feature = "tls")]
    Tls(TcpListener, tokio_rustls::TlsAcceptor),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// One control-plane acceptor.
pub struct TransportServer {
    listener: Listener,
    password: Option<String>,
}

impl TransportServer {
    /// Bind a transport described by a [`TransportSpec`].
    pub async fn bind(spec: &TransportSpec) -> Result<Self, TransportError> {
        match spec {
            TransportSpec::Ip(ip) => Self::bind_ip(ip).await,
            TransportSpec::Unix(unix) => Self::bind_unix_spec(unix).await,
        }
    }

    async fn bind_ip(spec: &IpTransport) -> Result<Self, TransportError> {
        if spec.port == 0 || spec.port > u16::MAX as u64 {
            return Err(TransportError::InvalidPort);
        }

        let address: IpAddr = match &spec.address {
            Some(address) => address
                .parse()
                .map_err(|_| TransportError::InvalidAddress)?,
            None if spec.ipv6 => IpAddr::from([0u8; 16]),
            None if spec.ipv4 => IpAddr::from([0u8; 4]),
            None => return Err(TransportError::InvalidFamily),
        };

        let addr = SocketAddr::new(address, spec.port as u16);

        match (&spec.certificate, &spec.key) {
            (None, None) => Self::bind_tcp(addr, spec.password.clone()).await,
            (Some(certificate), Some(key)) => {
                Self::bind_tls(addr, spec.password.clone(), certificate, key).await
            }
            (Some(_), None) => Err(TransportError::InvalidPrivateKey),
            (None, Some(_)) => Err(TransportError::InvalidCertificate),
        }
    }

    /// Bind a plain TCP transport.
    pub async fn bind_tcp(
        addr: SocketAddr,
        password: Option<String>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|_| TransportError::InvalidAddress)?;

        Ok(TransportServer {
            listener: Listener::Tcp(listener),
            password,
        })
    }

    /// Bind a TLS transport from PEM certificate and key files.
    #[cfg(feature = "tls")]
    pub async fn bind_tls(
        addr: SocketAddr,
        password: Option<String>,
        certificate: &str,
        key: &str,
    ) -> Result<Self, TransportError> {
        use std::sync::Arc;

        let certs = load_certificates(certificate)?;
        let key = load_private_key(key)?;

        let config = tokio_rustls::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|_| TransportError::InvalidCertificate)?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|_| TransportError::InvalidAddress)?;

        Ok(TransportServer {
            listener: Listener::Tls(listener, tokio_rustls::TlsAcceptor::from(Arc::new(config))),
            password,
        })
    }

    #[cfg(not(feature = "tls"))]
    pub async fn bind_tls(
        _addr: SocketAddr,
        _password: Option<String>,
        _certificate: &str,
        _key: &str,
    ) -> Result<Self, TransportError> {
        Err(TransportError::SslDisabled)
    }

    async fn bind_unix_spec(spec: &UnixTransport) -> Result<Self, TransportError> {
        if spec.path.is_empty() {
            return Err(TransportError::InvalidPath);
        }

        Self::bind_unix(&spec.path, spec.password.clone()).await
    }

    /// Bind a local stream socket transport.
    #[cfg(unix)]
    pub async fn bind_unix(path: &str, password: Option<String>) -> Result<Self, TransportError> {
        // A stale socket from a previous run would make bind fail.
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path).map_err(|_| TransportError::InvalidPath)?;

        Ok(TransportServer {
            listener: Listener::Unix(listener),
            password,
        })
    }

    #[cfg(not(unix))]
    pub async fn bind_unix(
        _path: &str,
        _password: Option<String>,
    ) -> Result<Self, TransportError> {
        Err(TransportError::NotSupported)
    }

    /// The bound TCP address, when applicable. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(feature = "tls")]
            Listener::Tls(listener, _) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(_) => None,
        }
    }

    /// Start the accept loop.
    pub(crate) fn spawn(self, control: UnboundedSender<ControlMessage>) {
        let password = self.password;

        match self.listener {
            Listener::Tcp(listener) => {
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, peer)) => {
                                info!(%peer, "transport client connected");
                                tokio::spawn(client::run_client(
                                    stream,
                                    password.clone(),
                                    control.clone(),
                                ));
                            }
                            Err(e) => {
                                warn!("accept failed: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            #[cfg(feature = "tls")]
            Listener::Tls(listener, acceptor) => {
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, peer)) => {
                                info!(%peer, "transport client connected");

                                let acceptor = acceptor.clone();
                                let password = password.clone();
                                let control = control.clone();

                                tokio::spawn(async move {
                                    match acceptor.accept(stream).await {
                                        Ok(stream) => {
                                            client::run_client(stream, password, control).await;
                                        }
                                        Err(e) => warn!("tls accept failed: {}", e),
                                    }
                                });
                            }
                            Err(e) => {
                                warn!("accept failed: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, _)) => {
                                info!("transport client connected on local socket");
                                tokio::spawn(client::run_client(
                                    stream,
                                    password.clone(),
                                    control.clone(),
                                ));
                            }
                            Err(e) => {
                                warn!("accept failed: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
        }
    }
}

#[cfg(feature = "tls")]
fn load_certificates(
    path: &str,
) -> Result<Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>, TransportError> {
    let file = std::fs::File::open(path).map_err(|_| TransportError::InvalidCertificate)?;
    let mut reader = std::io::BufReader::new(file);

    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|_| TransportError::InvalidCertificate)?;

    if certs.is_empty() {
        return Err(TransportError::InvalidCertificate);
    }

    Ok(certs)
}

#[cfg(feature = "tls")]
fn load_private_key(
    path: &str,
) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>, TransportError> {
    let file = std::fs::File::open(path).map_err(|_| TransportError::InvalidPrivateKey)?;
    let mut reader = std::io::BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .ok()
        .flatten()
        .ok_or(TransportError::InvalidPrivateKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ip_validation() {
        let spec = IpTransport {
            port: 0,
            ..IpTransport::default()
        };
        assert!(matches!(
            TransportServer::bind(&TransportSpec::Ip(spec)).await,
            Err(TransportError::InvalidPort)
        ));

        let spec = IpTransport {
            port: 70000,
            ..IpTransport::default()
        };
        assert!(matches!(
            TransportServer::bind(&TransportSpec::Ip(spec)).await,
            Err(TransportError::InvalidPort)
        ));

        let spec = IpTransport {
            address: Some("not an address".to_owned()),
            port: 6660,
            ..IpTransport::default()
        };
        assert!(matches!(
            TransportServer::bind(&TransportSpec::Ip(spec)).await,
            Err(TransportError::InvalidAddress)
        ));

        let spec = IpTransport {
            port: 6660,
            ipv4: false,
            ipv6: false,
            ..IpTransport::default()
        };
        assert!(matches!(
            TransportServer::bind(&TransportSpec::Ip(spec)).await,
            Err(TransportError::InvalidFamily)
        ));
    }

    #[tokio::test]
    async fn test_bind_tls_requires_both_pem_files() {
        let spec = IpTransport {
            address: Some("127.0.0.1".to_owned()),
            port: 6661,
            certificate: Some("/tmp/cert.pem".to_owned()),
            key: None,
            ..IpTransport::default()
        };

        assert!(matches!(
            TransportServer::bind(&TransportSpec::Ip(spec)).await,
            Err(TransportError::InvalidPrivateKey)
        ));
    }

    #[tokio::test]
    async fn test_bind_tcp_ephemeral() {
        let server = TransportServer::bind_tcp("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();

        assert!(server.local_addr().is_some());
    }

    #[test]
    fn test_spec_deserialization() {
        let spec: TransportSpec = serde_json::from_value(serde_json::json!({
            "type": "ip",
            "port": 6667,
            "password": "secret",
        }))
        .unwrap();

        match spec {
            TransportSpec::Ip(ip) => {
                assert_eq!(ip.port, 6667);
                assert_eq!(ip.password.as_deref(), Some("secret"));
                assert!(ip.ipv4 && ip.ipv6);
            }
            _ => panic!("expected ip transport"),
        }

        let spec: TransportSpec = serde_json::from_value(serde_json::json!({
            "type": "unix",
            "path": "/run/bot.sock",
        }))
        .unwrap();
        assert!(matches!(spec, TransportSpec::Unix(_)));
    }
}
