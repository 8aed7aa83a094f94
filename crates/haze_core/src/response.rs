use crate::error::ProxyError;
use haze_traits::{BodyMeta, PayloadInjector, PayloadMarker};
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use hyper::{Body, Response};
use tracing::warn;

fn is_html(resp: &Response<Body>) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// Rewrites an HTML response with the marker's payload. Other responses stream through untouched.
pub async fn apply_payload(
    resp: Response<Body>,
    marker: &PayloadMarker,
    injector: &dyn PayloadInjector,
) -> Response<Body> {
    if marker.is_empty() || !is_html(&resp) {
        return resp;
    }

    let (mut parts, body) = resp.into_parts();
    let body = match hyper::body::to_bytes(body).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to buffer response for injection: {}", e);
            return ProxyError::Upstream(e).into_response();
        }
    };

    let meta = BodyMeta {
        content_type: parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        content_encoding: parts.headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()),
    };
    let Some(rewritten) = injector.inject(&meta, &body, marker.payload()) else {
        return Response::from_parts(parts, Body::from(body));
    };

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(TRANSFER_ENCODING);
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
    Response::from_parts(parts, Body::from(rewritten))
}
