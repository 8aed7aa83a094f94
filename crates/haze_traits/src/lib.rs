use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Token of the newest Chrome signature known to the handshake layer.
pub const CHROME_AUTO_TOKEN: &str = "133";

/// The browser handshake a single request is sent with.
///
/// `version_token` is a key into the ClientHello profile catalog, not a semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyIdentity {
    pub browser_family: String,
    pub version_token: String,
}

impl ProxyIdentity {
    pub fn new(browser_family: impl Into<String>, version_token: impl Into<String>) -> Self {
        Self {
            browser_family: browser_family.into(),
            version_token: version_token.into(),
        }
    }

    /// Identity used whenever a User-Agent cannot be mapped onto the catalog.
    pub fn chrome_auto() -> Self {
        Self::new("Chrome", CHROME_AUTO_TOKEN)
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.browser_family, self.version_token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("browser '{0}' not found in fingerprint catalog")]
    UnrecognizedBrowser(String),
    #[error("cannot parse major version from '{0}'")]
    UnparsableVersion(String),
}

/// Maps a declared User-Agent onto a handshake identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, user_agent: &str) -> Result<ProxyIdentity, FingerprintError>;
}

/// Proxy authentication state of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
}

/// Per-connection context handed to every request served on that connection.
///
/// Plain proxy connections start `Unauthenticated` and stay that way: each request
/// is checked on its own. A MITM tunnel is created only after its CONNECT passed
/// the gate, so its context is `Authenticated` for its whole lifetime.
#[derive(Debug, Clone)]
pub struct ConnContext {
    pub peer: SocketAddr,
    pub auth: AuthState,
    /// `host:port` the tunnel was opened to.
    pub tunnel: Option<String>,
}

impl ConnContext {
    pub fn plain(peer: SocketAddr) -> Self {
        Self {
            peer,
            auth: AuthState::Unauthenticated,
            tunnel: None,
        }
    }

    pub fn tunnel(peer: SocketAddr, authority: impl Into<String>) -> Self {
        Self {
            peer,
            auth: AuthState::Authenticated,
            tunnel: Some(authority.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth == AuthState::Authenticated
    }
}

/// Injection payload riding along with a request until its response comes back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadMarker {
    payload: String,
}

impl PayloadMarker {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Response headers relevant to body rewriting.
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyMeta<'a> {
    pub content_type: Option<&'a str>,
    pub content_encoding: Option<&'a str>,
}

/// Response-stage rewriter fed with the payload carried by a [`PayloadMarker`].
pub trait PayloadInjector: Send + Sync {
    /// Returns the rewritten, identity-encoded body, or `None` to leave the response untouched.
    fn inject(&self, meta: &BodyMeta<'_>, body: &[u8], payload: &str) -> Option<Bytes>;
}
