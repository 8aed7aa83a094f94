use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use haze_traits::ConnContext;
use tracing::debug;

/// Realm advertised in `Proxy-Authenticate` challenges.
pub const REALM: &str = "Hazetunnel Proxy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials an instance was configured with. Both empty disables authentication.
    pub fn configured(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() && password.is_empty() {
            None
        } else {
            Some(Self::new(username, password))
        }
    }

    /// Decodes a `Basic <base64(user:pass)>` header value.
    pub fn from_basic_header(value: &str) -> Option<Self> {
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = STANDARD.decode(encoded).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some(Self::new(user, pass))
    }

    pub fn to_basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

/// Authentication passes when nothing is configured, or on an exact match.
pub fn check(provided: Option<&Credentials>, configured: Option<&Credentials>) -> bool {
    match configured {
        None => true,
        Some(expected) => provided == Some(expected),
    }
}

/// Per-instance proxy authentication policy.
#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    configured: Option<Credentials>,
}

impl AuthGate {
    pub fn new(configured: Option<Credentials>) -> Self {
        Self { configured }
    }

    pub fn from_setup(username: &str, password: &str) -> Self {
        Self::new(Credentials::configured(username, password))
    }

    pub fn is_enabled(&self) -> bool {
        self.configured.is_some()
    }

    /// Checks a raw `Proxy-Authorization` value. Malformed headers fail like wrong ones.
    pub fn verify_header(&self, header: Option<&str>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let provided = header.and_then(Credentials::from_basic_header);
        let ok = check(provided.as_ref(), self.configured.as_ref());
        if !ok {
            debug!("Proxy credentials rejected (header present: {})", header.is_some());
        }
        ok
    }

    /// Requests inside an authenticated tunnel are never re-validated.
    pub fn admit(&self, ctx: &ConnContext, header: Option<&str>) -> bool {
        ctx.is_authenticated() || self.verify_header(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> std::net::SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn disabled_gate_admits_everything() {
        let gate = AuthGate::from_setup("", "");
        assert!(!gate.is_enabled());
        assert!(gate.verify_header(None));
        assert!(gate.verify_header(Some("Basic !!!")));
    }

    #[test]
    fn exact_match_required() {
        let gate = AuthGate::from_setup("alice", "s3cret");
        let good = Credentials::new("alice", "s3cret").to_basic_header();
        assert!(gate.verify_header(Some(&good)));

        for bad in [
            Credentials::new("Alice", "s3cret").to_basic_header(),
            Credentials::new("alice", "S3cret").to_basic_header(),
            Credentials::new("alice", "").to_basic_header(),
        ] {
            assert!(!gate.verify_header(Some(&bad)), "{bad}");
        }
        assert!(!gate.verify_header(None));
    }

    #[test]
    fn malformed_headers_fail() {
        let gate = AuthGate::from_setup("alice", "s3cret");
        assert!(!gate.verify_header(Some("Bearer abc")));
        assert!(!gate.verify_header(Some("Basic not-base64!")));
        // "alice" without a colon
        assert!(!gate.verify_header(Some("Basic YWxpY2U=")));
        assert!(!gate.verify_header(Some("basic YWxpY2U6czNjcmV0")));
    }

    #[test]
    fn password_may_contain_colons() {
        let gate = AuthGate::from_setup("bob", "a:b:c");
        let header = Credentials::new("bob", "a:b:c").to_basic_header();
        assert!(gate.verify_header(Some(&header)));
    }

    #[test]
    fn only_username_configured_still_requires_auth() {
        let gate = AuthGate::from_setup("bob", "");
        assert!(gate.is_enabled());
        assert!(!gate.verify_header(None));
        assert!(gate.verify_header(Some(&Credentials::new("bob", "").to_basic_header())));
    }

    #[test]
    fn tunnel_context_skips_validation() {
        let gate = AuthGate::from_setup("alice", "s3cret");
        assert!(gate.admit(&ConnContext::tunnel(peer(), "example.com:443"), None));
        assert!(!gate.admit(&ConnContext::plain(peer()), None));
    }

    #[test]
    fn check_contract() {
        let pair = Credentials::new("u", "p");
        assert!(check(None, None));
        assert!(check(Some(&pair), None));
        assert!(check(Some(&pair), Some(&pair)));
        assert!(!check(None, Some(&pair)));
    }
}
