use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use haze_traits::{BodyMeta, PayloadInjector};
use std::io::Read;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("failed to decode body: {0}")]
    Decode(#[from] std::io::Error),
}

/// Inserts the payload as an inline `<script>` into HTML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptInjector;

impl ScriptInjector {
    fn is_html(meta: &BodyMeta<'_>) -> bool {
        meta.content_type
            .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"))
            .unwrap_or(false)
    }

    /// Returns the identity-encoded body.
    pub fn decode(encoding: Option<&str>, body: &[u8]) -> Result<Vec<u8>, PayloadError> {
        let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
        let mut out = Vec::with_capacity(body.len());
        match encoding.as_deref() {
            None | Some("") | Some("identity") => out.extend_from_slice(body),
            Some("gzip") | Some("x-gzip") => {
                GzDecoder::new(body).read_to_end(&mut out)?;
            }
            Some("deflate") => {
                ZlibDecoder::new(body).read_to_end(&mut out)?;
            }
            Some(other) => return Err(PayloadError::UnsupportedEncoding(other.to_string())),
        }
        Ok(out)
    }

    /// Places `<script>payload</script>` after `<head ...>`, else before `<body`, else in front.
    pub fn splice(html: &[u8], payload: &str) -> Vec<u8> {
        let tag = format!("<script>{}</script>", payload);
        let lower = html.to_ascii_lowercase();

        let at = find(&lower, b"<head")
            .and_then(|start| {
                let next = lower.get(start + 5).copied();
                // reject <header
                matches!(next, Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r'))
                    .then(|| find(&lower[start..], b">").map(|end| start + end + 1))
                    .flatten()
            })
            .or_else(|| find(&lower, b"<body"))
            .unwrap_or(0);

        let mut out = Vec::with_capacity(html.len() + tag.len());
        out.extend_from_slice(&html[..at]);
        out.extend_from_slice(tag.as_bytes());
        out.extend_from_slice(&html[at..]);
        out
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl PayloadInjector for ScriptInjector {
    fn inject(&self, meta: &BodyMeta<'_>, body: &[u8], payload: &str) -> Option<Bytes> {
        if payload.is_empty() || !Self::is_html(meta) {
            return None;
        }
        let html = match Self::decode(meta.content_encoding, body) {
            Ok(html) => html,
            Err(e) => {
                warn!("Skipping payload injection: {}", e);
                return None;
            }
        };
        debug!("Injecting {} byte payload into {} byte document", payload.len(), html.len());
        Some(Bytes::from(Self::splice(&html, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn html_meta(encoding: Option<&'static str>) -> BodyMeta<'static> {
        BodyMeta {
            content_type: Some("text/html; charset=utf-8"),
            content_encoding: encoding,
        }
    }

    #[test]
    fn injects_after_head() {
        let out = ScriptInjector::splice(b"<html><HEAD lang=\"en\"><title>x</title></HEAD></html>", "go()");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<html><HEAD lang=\"en\"><script>go()</script><title>x</title></HEAD></html>"
        );
    }

    #[test]
    fn falls_back_to_body_then_front() {
        let out = ScriptInjector::splice(b"<html><header></header><body>hi</body></html>", "a");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<html><header></header><script>a</script><body>hi</body></html>"
        );
        let out = ScriptInjector::splice(b"plain", "a");
        assert_eq!(out, b"<script>a</script>plain");
    }

    #[test]
    fn decodes_gzip_bodies() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"<head></head>").unwrap();
        let gz = enc.finish().unwrap();

        let out = ScriptInjector.inject(&html_meta(Some("gzip")), &gz, "p").unwrap();
        assert_eq!(&out[..], b"<head><script>p</script></head>");
    }

    #[test]
    fn leaves_other_responses_alone() {
        let json = BodyMeta {
            content_type: Some("application/json"),
            content_encoding: None,
        };
        assert!(ScriptInjector.inject(&json, b"{}", "p").is_none());
        assert!(ScriptInjector.inject(&html_meta(None), b"<head>", "").is_none());
        assert!(ScriptInjector.inject(&html_meta(Some("br")), b"\x00\x01", "p").is_none());
    }
}
