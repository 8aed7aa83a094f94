use crate::error::TransportError;
use crate::tls::{ProfileImpersonator, TlsImpersonator};
use crate::upstream::UpstreamProxy;
use haze_traits::ProxyIdentity;
use hyper::client::connect::{Connected, Connection};
use hyper::service::Service;
use hyper::{Body, Client, Request, Response, Uri};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

/// Protocol-agnostic stream: raw TCP, a proxy tunnel, or TLS on top of either.
pub type BoxedStream = Box<dyn RawStream>;

pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawStream for T {}

/// Connection handed to hyper, remembering whether ALPN settled on HTTP/2.
pub struct ImpersonatedStream {
    inner: BoxedStream,
    h2: bool,
}

impl Connection for ImpersonatedStream {
    fn connected(&self) -> Connected {
        let connected = Connected::new();
        if self.h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl AsyncRead for ImpersonatedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ImpersonatedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// hyper connector performing the impersonated handshake, optionally through an upstream proxy.
#[derive(Clone)]
pub struct ImpersonatingConnector {
    tls: Arc<dyn TlsImpersonator>,
    upstream: Option<Arc<UpstreamProxy>>,
}

impl ImpersonatingConnector {
    pub fn new(tls: Arc<dyn TlsImpersonator>, upstream: Option<UpstreamProxy>) -> Self {
        Self {
            tls,
            upstream: upstream.map(Arc::new),
        }
    }

    async fn connect(&self, dst: Uri) -> Result<ImpersonatedStream, TransportError> {
        let is_tls = dst.scheme_str() == Some("https");
        let host = dst
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| TransportError::MissingHost(dst.to_string()))?;
        let port = dst.port_u16().unwrap_or(if is_tls { 443 } else { 80 });

        let tcp: BoxedStream = match &self.upstream {
            Some(proxy) => proxy.tunnel(&host, port).await?,
            None => {
                let stream = TcpStream::connect((host.as_str(), port)).await?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
        };

        if !is_tls {
            debug!("Plain connection to {}:{}", host, port);
            return Ok(ImpersonatedStream { inner: tcp, h2: false });
        }

        let session = self.tls.handshake(&host, tcp).await?;
        Ok(ImpersonatedStream {
            inner: session.stream,
            h2: session.alpn_h2,
        })
    }
}

impl Service<Uri> for ImpersonatingConnector {
    type Response = ImpersonatedStream;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.connect(dst).await })
    }
}

/// Executes exactly one intercepted request with a fixed handshake identity.
pub struct RequestExecutor {
    identity: ProxyIdentity,
    client: Client<ImpersonatingConnector, Body>,
}

impl RequestExecutor {
    pub fn identity(&self) -> &ProxyIdentity {
        &self.identity
    }

    pub async fn execute(&self, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        self.client.request(req).await
    }
}

pub struct TransportBuilder;

impl TransportBuilder {
    /// Builds a fresh executor bound to `identity`. Nothing is shared between requests.
    pub fn build(
        identity: &ProxyIdentity,
        upstream: Option<UpstreamProxy>,
    ) -> Result<RequestExecutor, TransportError> {
        let tls = ProfileImpersonator::new(identity)?;
        Ok(Self::with_impersonator(identity, Arc::new(tls), upstream))
    }

    /// Same as [`TransportBuilder::build`] with a caller-supplied TLS provider.
    pub fn with_impersonator(
        identity: &ProxyIdentity,
        tls: Arc<dyn TlsImpersonator>,
        upstream: Option<UpstreamProxy>,
    ) -> RequestExecutor {
        let connector = ImpersonatingConnector::new(tls, upstream);
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build::<_, Body>(connector);
        RequestExecutor {
            identity: identity.clone(),
            client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::server::conn::Http;
    use hyper::service::service_fn;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    /// TLS origin with a self-signed leaf. Echoes the SNI it saw and the HTTP version spoken.
    async fn spawn_tls_origin(alpn: &[&[u8]], h2: bool) -> u16 {
        let leaf = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                vec![rustls::Certificate(leaf.serialize_der().unwrap())],
                rustls::PrivateKey(leaf.serialize_private_key_der()),
            )
            .unwrap();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(tls) = acceptor.accept(socket).await else {
                        return;
                    };
                    let sni = tls.get_ref().1.server_name().unwrap_or("-").to_string();
                    let service = service_fn(move |req: Request<Body>| {
                        let resp = Response::builder()
                            .header("x-sni", sni.as_str())
                            .header("x-version", format!("{:?}", req.version()))
                            .body(Body::from("secure"));
                        async move { resp }
                    });
                    let mut http = Http::new();
                    if h2 {
                        http.http2_only(true);
                    } else {
                        http.http1_only(true);
                    }
                    let _ = http.serve_connection(tls, service).await;
                });
            }
        });
        port
    }

    async fn fetch(url: String) -> Response<Body> {
        let executor = TransportBuilder::build(&ProxyIdentity::chrome_auto(), None).unwrap();
        let req = Request::get(url).body(Body::empty()).unwrap();
        executor.execute(req).await.unwrap()
    }

    async fn spawn_backend() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nHello";
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn executes_plain_http_directly() {
        let port = spawn_backend().await;
        let executor = TransportBuilder::build(&ProxyIdentity::chrome_auto(), None).unwrap();
        assert_eq!(executor.identity(), &ProxyIdentity::chrome_auto());

        let req = Request::get(format!("http://127.0.0.1:{port}/"))
            .body(Body::empty())
            .unwrap();
        let resp = executor.execute(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Hello");
    }

    #[tokio::test]
    async fn unreachable_origin_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let executor = TransportBuilder::build(&ProxyIdentity::chrome_auto(), None).unwrap();
        let req = Request::get(format!("http://127.0.0.1:{port}/"))
            .body(Body::empty())
            .unwrap();
        assert!(executor.execute(req).await.is_err());
    }

    #[tokio::test]
    async fn https_to_ip_literal_sends_no_sni() {
        let port = spawn_tls_origin(&[b"http/1.1"], false).await;
        let resp = fetch(format!("https://127.0.0.1:{port}/")).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-sni"], "-");
        assert_eq!(resp.headers()["x-version"], "HTTP/1.1");
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"secure");
    }

    #[tokio::test]
    async fn https_to_hostname_sends_sni() {
        let port = spawn_tls_origin(&[b"http/1.1"], false).await;
        let resp = fetch(format!("https://localhost:{port}/")).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-sni"], "localhost");
    }

    #[tokio::test]
    async fn alpn_h2_switches_the_client_to_http2() {
        let port = spawn_tls_origin(&[b"h2"], true).await;
        let resp = fetch(format!("https://localhost:{port}/")).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-version"], "HTTP/2.0");
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"secure");
    }
}
