use crate::error::ProxyError;
use crate::pipeline::{strip_hop_by_hop, Outcome, RequestPipeline};
use crate::response::apply_payload;
use anyhow::Context as _;
use haze_net::CertificateAuthority;
use haze_traits::{ConnContext, PayloadInjector, PayloadMarker};
use hyper::header::{HeaderValue, CONNECTION};
use hyper::http::uri::{Authority, Scheme};
use hyper::server::conn::{AddrIncoming, AddrStream, Http};
use hyper::service::{make_service_fn, service_fn};
use hyper::upgrade::Upgraded;
use hyper::{Body, Method, Request, Response, Server, Uri};
use mod_payload::ScriptInjector;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Everything one running instance needs to answer a request.
pub struct ProxyState {
    pipeline: RequestPipeline,
    ca: Arc<CertificateAuthority>,
    injector: Arc<dyn PayloadInjector>,
}

impl ProxyState {
    pub fn new(pipeline: RequestPipeline, ca: Arc<CertificateAuthority>) -> Self {
        Self::with_injector(pipeline, ca, Arc::new(ScriptInjector))
    }

    pub fn with_injector(
        pipeline: RequestPipeline,
        ca: Arc<CertificateAuthority>,
        injector: Arc<dyn PayloadInjector>,
    ) -> Self {
        Self {
            pipeline,
            ca,
            injector,
        }
    }
}

/// Accepts proxy connections until `shutdown` fires. Stopping does not drain open tunnels.
pub async fn serve(
    incoming: AddrIncoming,
    state: Arc<ProxyState>,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let peer = conn.remote_addr();
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), peer, req)))
        }
    });

    let server = Server::builder(incoming).serve(make_svc);
    tokio::select! {
        res = server => res,
        _ = shutdown => Ok(()),
    }
}

async fn handle(
    state: Arc<ProxyState>,
    peer: SocketAddr,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::CONNECT {
        return Ok(connect(state, peer, req));
    }
    if req.uri().scheme().is_none() || req.uri().authority().is_none() {
        return Ok(ProxyError::NonProxyRequest.into_response());
    }
    Ok(forward(&state, &ConnContext::plain(peer), req).await)
}

fn connect(state: Arc<ProxyState>, peer: SocketAddr, req: Request<Body>) -> Response<Body> {
    let Some(authority) = req.uri().authority().cloned() else {
        return ProxyError::InvalidConnectTarget(req.uri().to_string()).into_response();
    };

    if !state.pipeline.admit_connect(&req) {
        let mut resp = ProxyError::AuthenticationRequired.into_response();
        resp.headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        return resp;
    }

    debug!("CONNECT {} from {}", authority, peer);
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = serve_tunnel(state, peer, authority.clone(), upgraded).await {
                    debug!("Tunnel to {} closed: {:#}", authority, e);
                }
            }
            Err(e) => error!("Upgrade for {} failed: {}", authority, e),
        }
    });

    Response::new(Body::empty())
}

/// Terminates TLS inside an accepted tunnel and serves the decrypted requests.
async fn serve_tunnel(
    state: Arc<ProxyState>,
    peer: SocketAddr,
    authority: Authority,
    upgraded: Upgraded,
) -> anyhow::Result<()> {
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    let acceptor = state
        .ca
        .acceptor(host)
        .with_context(|| format!("no certificate for {}", host))?;
    let tls = acceptor
        .accept(upgraded)
        .await
        .with_context(|| format!("client handshake for {}", host))?;

    let ctx = ConnContext::tunnel(peer, authority.as_str());
    let service = service_fn(move |req| {
        let state = state.clone();
        let ctx = ctx.clone();
        let authority = authority.clone();
        async move {
            let req = match absolute_in_tunnel(req, authority) {
                Ok(req) => req,
                Err(e) => return Ok::<_, Infallible>(e.into_response()),
            };
            Ok(forward(&state, &ctx, req).await)
        }
    });

    Http::new()
        .http1_only(true)
        .serve_connection(tls, service)
        .await
        .context("tunnel connection")?;
    Ok(())
}

/// Tunnelled requests arrive in origin-form; give them back their `https://authority`.
fn absolute_in_tunnel(
    mut req: Request<Body>,
    authority: Authority,
) -> Result<Request<Body>, ProxyError> {
    if req.uri().scheme().is_some() {
        return Ok(req);
    }
    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(Scheme::HTTPS);
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(hyper::http::uri::PathAndQuery::from_static("/"));
    }
    let uri = Uri::from_parts(parts)
        .map_err(|e| ProxyError::InvalidConnectTarget(e.to_string()))?;
    *req.uri_mut() = uri;
    Ok(req)
}

async fn forward(state: &ProxyState, ctx: &ConnContext, req: Request<Body>) -> Response<Body> {
    let (request, executor) = match state.pipeline.handle(req, ctx) {
        Outcome::Forward { request, executor } => (request, executor),
        Outcome::Respond(e) => return e.into_response(),
    };

    let marker = request
        .extensions()
        .get::<PayloadMarker>()
        .cloned()
        .unwrap_or_default();

    match executor.execute(request).await {
        Ok(resp) => {
            let mut resp = apply_payload(resp, &marker, state.injector.as_ref()).await;
            strip_hop_by_hop(resp.headers_mut());
            resp
        }
        Err(e) => ProxyError::Upstream(e).into_response(),
    }
}
