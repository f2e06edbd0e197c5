//! Quinn-based QUIC listener.
//!
//! Each client holds one QUIC connection carrying two persistent
//! unidirectional streams: the server opens one at accept time and sends
//! every outbound event down it (so even a client that never speaks
//! receives broadcasts), and the client opens one for its inbound events.
//! QUIC keep-alive covers idle-connection liveness, so the chat layer
//! carries no heartbeat of its own.
//!
//! TLS 1.3 is enforced via `rustls` with ALPN set to `parley`. PEM
//! certificate and key paths are used when configured; otherwise a
//! self-signed localhost certificate is generated, which is only suitable
//! for development and logs a warning.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parley_proto::ALPN_PROTOCOL;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};

use crate::error::ServerError;

/// Idle timeout after which a silent peer is presumed gone. Client
/// keep-alives arrive well inside this window.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// QUIC listener endpoint.
pub struct QuicTransport {
    /// Quinn endpoint.
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Create and bind a new listener.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] for an unparseable address or bad TLS
    ///   material
    /// - [`ServerError::Transport`] if the socket cannot be bound - the
    ///   caller treats this as fatal
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        Ok(Self { endpoint })
    }

    /// Accept the next QUIC connection.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the endpoint is closed or the
    ///   handshake fails
    pub async fn accept(&self) -> Result<QuicConnection, ServerError> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| ServerError::Transport("endpoint closed".to_string()))?;

        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("connection failed: {e}")))?;

        Ok(QuicConnection { connection })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// One accepted client connection.
pub struct QuicConnection {
    connection: quinn::Connection,
}

impl QuicConnection {
    /// Open the outbound event stream toward the client.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the connection is already gone
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni failed: {e}")))
    }

    /// Wait for the client to open its inbound event stream.
    ///
    /// A listen-only client may never open one; this pends until the
    /// connection dies in that case.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] once the connection is gone
    pub async fn accept_uni(&self) -> Result<RecvStream, ServerError> {
        self.connection
            .accept_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_uni failed: {e}")))
    }

    /// Remote peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection with an application error code and reason.
    pub fn close(&self, code: u32, reason: &[u8]) {
        self.connection.close(code.into(), reason);
    }
}

/// Build the transport parameters shared by both TLS paths.
fn transport_config() -> Result<quinn::TransportConfig, ServerError> {
    let mut transport = quinn::TransportConfig::default();
    let idle = IDLE_TIMEOUT
        .try_into()
        .map_err(|_| ServerError::Config("idle timeout out of range".to_string()))?;
    transport.max_idle_timeout(Some(idle));
    Ok(transport)
}

/// Load TLS configuration from PEM certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    use std::fs;

    let cert_pem = fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    build_server_config(certs, key)
}

/// Generate a self-signed certificate for development.
fn self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    tracing::warn!("using a self-signed certificate - not for production use");

    build_server_config(vec![cert_der], key.into())
}

fn build_server_config(
    certs: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ServerConfig, ServerError> {
    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?,
    ));
    server_config.transport_config(Arc::new(transport_config()?));

    Ok(server_config)
}
