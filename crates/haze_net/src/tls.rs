use crate::error::TransportError;
use crate::profile::ClientHelloProfile;
use crate::transport::BoxedStream;
use async_trait::async_trait;
use boring::ssl::SslConnector;
use haze_traits::ProxyIdentity;
use std::net::IpAddr;
use tracing::debug;

/// Outcome of a client handshake toward the origin.
pub struct TlsSession {
    pub stream: BoxedStream,
    /// The origin picked `h2` through ALPN.
    pub alpn_h2: bool,
}

/// Abstract interface for TLS providers performing the client handshake.
#[async_trait]
pub trait TlsImpersonator: Send + Sync {
    /// Handshakes the underlying stream and returns the encrypted session.
    async fn handshake(&self, domain: &str, stream: BoxedStream) -> Result<TlsSession, TransportError>;
}

/// BoringSSL provider shaped after one browser identity.
pub struct ProfileImpersonator {
    identity: ProxyIdentity,
    connector: SslConnector,
}

impl ProfileImpersonator {
    pub fn new(identity: &ProxyIdentity) -> Result<Self, TransportError> {
        let connector = ClientHelloProfile::for_identity(identity).connector()?;
        Ok(Self {
            identity: identity.clone(),
            connector,
        })
    }
}

#[async_trait]
impl TlsImpersonator for ProfileImpersonator {
    async fn handshake(&self, domain: &str, stream: BoxedStream) -> Result<TlsSession, TransportError> {
        let mut config = self.connector.configure()?;
        // The origin certificate is never checked; the client already trusts our MITM leaf.
        config.set_verify_hostname(false);
        config.set_use_server_name_indication(domain.parse::<IpAddr>().is_err());

        let tls = tokio_boring::connect(config, domain, stream)
            .await
            .map_err(|e| TransportError::Handshake {
                host: domain.to_string(),
                reason: e.to_string(),
            })?;

        let alpn_h2 = tls.ssl().selected_alpn_protocol() == Some(b"h2".as_slice());
        debug!("{} handshake with {} complete (h2: {})", self.identity, domain, alpn_h2);

        Ok(TlsSession {
            stream: Box::new(tls),
            alpn_h2,
        })
    }
}
