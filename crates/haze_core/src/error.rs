use haze_net::{CaError, TransportError};
use hyper::header::{HeaderValue, CONTENT_TYPE, PROXY_AUTHENTICATE};
use hyper::{Body, Response, StatusCode};
use tracing::warn;

/// Prefix of every error body the proxy writes itself.
pub const ERROR_PREFIX: &str = "HAZETUNNEL ERROR: ";

/// Errors answered to the proxy client instead of forwarding the request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Proxy authentication required")]
    AuthenticationRequired,
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),
    #[error("Invalid upstream proxy: {0}")]
    InvalidUpstream(String),
    #[error("Invalid CONNECT target: {0}")]
    InvalidConnectTarget(String),
    #[error("This is a proxy server. Does not respond to non-proxy requests.")]
    NonProxyRequest,
    #[error("Transport setup failed: {0}")]
    Transport(TransportError),
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] hyper::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::AuthenticationRequired => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ProxyError::MissingHeader(_)
            | ProxyError::InvalidUpstream(_)
            | ProxyError::InvalidConnectTarget(_)
            | ProxyError::NonProxyRequest => StatusCode::BAD_REQUEST,
            ProxyError::Transport(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Plain-text response for the client. Authentication failures carry the Basic challenge.
    pub fn into_response(self) -> Response<Body> {
        warn!("CRITICAL: {}", self);
        let status = self.status();
        let mut resp = Response::new(Body::from(format!("{}{}", ERROR_PREFIX, self)));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            resp.headers_mut().insert(
                PROXY_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"Hazetunnel Proxy\""),
            );
        }
        resp
    }
}

/// Operator-facing failures starting or configuring instances.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("instance '{0}' is already running")]
    AlreadyRunning(String),
    #[error("invalid User-Agent override: {0:?}")]
    InvalidUserAgent(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate authority unavailable: {0}")]
    CertificateAuthority(#[from] CaError),
    #[error("server error: {0}")]
    Server(#[from] hyper::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate instance id '{0}'")]
    DuplicateId(String),
}
