use crate::config::ProxySetup;
use crate::error::{LifecycleError, ProxyError};
use haze_net::{RequestExecutor, TransportBuilder, TransportError, UpstreamProxy};
use haze_traits::{ConnContext, IdentityResolver, PayloadMarker, ProxyIdentity};
use hyper::header::{HeaderMap, HeaderValue, CONNECTION, PROXY_AUTHORIZATION, USER_AGENT};
use hyper::{Body, Request};
use mod_auth::AuthGate;
use mod_fingerprint::FingerprintResolver;
use std::sync::Arc;
use tracing::{debug, warn};

const HOP_BY_HOP: &[&str] = &[
    "proxy-authorization",
    "proxy-connection",
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "upgrade",
];

/// What the server should do with an intercepted request.
pub enum Outcome {
    /// Send `request` through `executor`, which was built for this request alone.
    Forward {
        request: Request<Body>,
        executor: RequestExecutor,
    },
    /// Answer the client directly; nothing was sent upstream.
    Respond(ProxyError),
}

/// Per-instance request interception: auth, User-Agent, identity, payload marker, transport.
pub struct RequestPipeline {
    gate: AuthGate,
    resolver: Arc<dyn IdentityResolver>,
    user_agent: Option<HeaderValue>,
    payload: PayloadMarker,
    upstream: Option<String>,
}

impl RequestPipeline {
    pub fn new(setup: &ProxySetup) -> Result<Self, LifecycleError> {
        Self::with_resolver(setup, Arc::new(FingerprintResolver::default()))
    }

    pub fn with_resolver(
        setup: &ProxySetup,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self, LifecycleError> {
        let user_agent = setup
            .user_agent_override()
            .map(|ua| {
                HeaderValue::from_str(ua)
                    .map_err(|_| LifecycleError::InvalidUserAgent(ua.to_string()))
            })
            .transpose()?;

        Ok(Self {
            gate: AuthGate::from_setup(&setup.username, &setup.password),
            resolver,
            user_agent,
            payload: PayloadMarker::new(setup.payload.clone()),
            upstream: setup.upstream().map(str::to_string),
        })
    }

    /// Checks a CONNECT before its tunnel is opened.
    pub fn admit_connect(&self, req: &Request<Body>) -> bool {
        self.gate.verify_header(proxy_authorization(req))
    }

    pub fn handle(&self, mut req: Request<Body>, ctx: &ConnContext) -> Outcome {
        if !self.gate.admit(ctx, proxy_authorization(&req)) {
            return Outcome::Respond(ProxyError::AuthenticationRequired);
        }
        strip_hop_by_hop(req.headers_mut());

        if let Some(ua) = &self.user_agent {
            req.headers_mut().insert(USER_AGENT, ua.clone());
        }
        let identity = match req.headers().get(USER_AGENT) {
            None => return Outcome::Respond(ProxyError::MissingHeader("User-Agent")),
            Some(ua) => self.identify(&String::from_utf8_lossy(ua.as_bytes())),
        };

        req.extensions_mut().insert(self.payload.clone());

        // Only an unparsable string is the client's 400; a URL we cannot dial through is a 502.
        let upstream = match self.upstream.as_deref().map(UpstreamProxy::parse).transpose() {
            Ok(upstream) => upstream,
            Err(TransportError::InvalidUpstreamUrl(raw)) => {
                return Outcome::Respond(ProxyError::InvalidUpstream(raw));
            }
            Err(e) => return Outcome::Respond(ProxyError::Transport(e)),
        };

        match TransportBuilder::build(&identity, upstream) {
            Ok(executor) => {
                debug!(
                    "{} {} as {} for {}{}",
                    req.method(),
                    req.uri(),
                    identity,
                    ctx.peer,
                    ctx.tunnel
                        .as_deref()
                        .map(|t| format!(" (tunnel {})", t))
                        .unwrap_or_default()
                );
                Outcome::Forward {
                    request: req,
                    executor,
                }
            }
            Err(e) => Outcome::Respond(ProxyError::Transport(e)),
        }
    }

    fn identify(&self, ua: &str) -> ProxyIdentity {
        match self.resolver.resolve(ua) {
            Ok(identity) => identity,
            Err(e) => {
                let fallback = ProxyIdentity::chrome_auto();
                warn!("Fingerprint lookup failed ({}), using {}", e, fallback);
                fallback
            }
        }
    }
}

fn proxy_authorization(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(PROXY_AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Removes connection-scoped headers, including any the client listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
        headers.remove(name);
    }
}
