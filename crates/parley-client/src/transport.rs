//! QUIC transport for the client.
//!
//! Thin I/O layer: builds the endpoint, dials the server, and opens the
//! single bidirectional chat stream. Certificate verification accepts any
//! certificate so development clients can talk to a self-signed server;
//! production deployments should front the server with a real
//! certificate and a verifying client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parley_proto::ALPN_PROTOCOL;
use quinn::{ClientConfig, Endpoint};
use thiserror::Error;

/// Keep-alive ping interval. Liveness is the transport's job; the chat
/// layer has no heartbeat of its own.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Idle timeout after which the connection is presumed dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach or handshake with the server.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The chat stream broke mid-session.
    #[error("stream error: {0}")]
    Stream(String),

    /// The server sent bytes that do not decode as the wire contract.
    #[error("protocol error: {0}")]
    Protocol(#[from] parley_proto::ProtocolError),
}

/// Dial the server and return the live connection.
pub(crate) async fn connect(
    server_addr: &str,
) -> Result<(Endpoint, quinn::Connection), ClientError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|e| ClientError::Connect(format!("invalid address '{server_addr}': {e}")))?;

    let bind_addr: SocketAddr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
        .parse()
        .map_err(|e| ClientError::Connect(format!("invalid bind address: {e}")))?;

    let mut endpoint = Endpoint::client(bind_addr)
        .map_err(|e| ClientError::Connect(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(client_config()?);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| ClientError::Connect(format!("connect failed: {e}")))?
        .await
        .map_err(|e| ClientError::Connect(format!("connection failed: {e}")))?;

    Ok((endpoint, connection))
}

/// Client config with the development certificate verifier and the
/// transport keep-alive.
fn client_config() -> Result<ClientConfig, ClientError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DevCertVerifier))
        .with_no_client_auth();

    // Must match the server's ALPN protocol.
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ClientError::Connect(format!("TLS config error: {e}")))?,
    ));

    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    let idle = IDLE_TIMEOUT
        .try_into()
        .map_err(|_| ClientError::Connect("idle timeout out of range".to_string()))?;
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
///
/// Development only: pairs with the server's self-signed certificate.
#[derive(Debug)]
struct DevCertVerifier;

impl rustls::client::danger::ServerCertVerifier for DevCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
