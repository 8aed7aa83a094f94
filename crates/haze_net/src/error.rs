use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid upstream proxy URL: {0}")]
    InvalidUpstreamUrl(String),
    #[error("unsupported upstream proxy scheme '{0}'")]
    UnsupportedUpstreamScheme(String),
    #[error("upstream proxy refused tunnel: {0}")]
    UpstreamRejected(String),
    #[error("request target has no host: {0}")]
    MissingHost(String),
    #[error("TLS configuration failed: {0}")]
    Tls(#[from] boring::error::ErrorStack),
    #[error("TLS handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },
    #[error("SOCKS5 upstream: {0}")]
    Socks(#[from] tokio_socks::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("CA file I/O: {0}")]
    Io(#[from] io::Error),
    #[error("certificate generation: {0}")]
    Rcgen(#[from] rcgen::RcgenError),
    #[error("TLS server config: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("found {present} but not {missing}; provide both files or neither")]
    IncompletePair { present: PathBuf, missing: PathBuf },
}
