//! Transports carrying REST calls to a daemon.
//!
//! - [`UnixTransport`]: local daemon over its unix socket
//! - [`HttpsTransport`]: remote daemon over mutual TLS

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::cert;
use crate::error::{ClientError, Result};
use crate::tls::{self, CapturingVerifier, PinnedCertVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    fn as_http(&self) -> hyper::Method {
        match self {
            Method::Get => hyper::Method::GET,
            Method::Post => hyper::Method::POST,
            Method::Put => hyper::Method::PUT,
            Method::Patch => hyper::Method::PATCH,
            Method::Delete => hyper::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single REST call. `path` includes the query string.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Sent as `If-Match`.
    pub etag: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            etag: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        let etag = etag.into();
        if !etag.is_empty() {
            self.etag = Some(etag);
        }
        self
    }
}

/// Undecoded daemon reply.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: Bytes,
}

/// Something that can carry a [`Request`] to a daemon.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: Request) -> Result<RawResponse>;

    /// Human readable endpoint for logs and diagnostics.
    fn endpoint(&self) -> String;
}

// =============================================================================
// Unix socket
// =============================================================================

/// Transport to a daemon listening on a local unix socket.
pub struct UnixTransport {
    socket: PathBuf,
    client: Client<hyperlocal::UnixConnector, Full<Bytes>>,
}

impl UnixTransport {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(hyperlocal::UnixConnector);
        Self {
            socket: socket.into(),
            client,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

impl fmt::Debug for UnixTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnixTransport")
            .field("socket", &self.socket)
            .finish()
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn send(&self, request: Request) -> Result<RawResponse> {
        let uri = hyperlocal::Uri::new(&self.socket, &request.path);

        let mut builder = hyper::Request::builder()
            .method(request.method.as_http())
            .uri(uri);
        if let Some(etag) = &request.etag {
            builder = builder.header(hyper::header::IF_MATCH, etag.as_str());
        }

        let body = match &request.body {
            Some(body) => {
                builder = builder.header(hyper::header::CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(serde_json::to_vec(body)?))
            }
            None => Full::new(Bytes::new()),
        };

        let req = builder
            .body(body)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        debug!(
            method = %request.method,
            path = %request.path,
            socket = %self.socket.display(),
            "Daemon request"
        );

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let etag = resp
            .headers()
            .get(hyper::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_bytes();

        Ok(RawResponse { status, etag, body })
    }

    fn endpoint(&self) -> String {
        format!("unix://{}", self.socket.display())
    }
}

// =============================================================================
// HTTPS
// =============================================================================

/// TLS material for an https remote.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM client certificate presented to the daemon.
    pub client_cert: Option<String>,
    /// PEM private key of the client certificate.
    pub client_key: Option<String>,
    /// Pinned PEM server certificate, checked by fingerprint during the
    /// handshake. When absent, system roots verify the server.
    pub server_cert: Option<String>,
}

/// Transport to a daemon reachable over HTTPS.
pub struct HttpsTransport {
    base: String,
    http: reqwest::Client,
    pinned_fingerprint: Option<String>,
}

impl HttpsTransport {
    /// Builds a transport for `base` (e.g. `https://host:8443`).
    ///
    /// With a pinned server certificate the handshake only completes against
    /// that exact certificate. Without one, system roots verify the server.
    pub fn new(base: impl Into<String>, tls: &TlsConfig) -> Result<Self> {
        let base = base.into().trim_end_matches('/').to_string();

        let builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(30));

        let (builder, pinned_fingerprint) = match &tls.server_cert {
            Some(pem) => {
                let verifier = Arc::new(PinnedCertVerifier::from_pem(pem)?);
                let fingerprint = verifier.fingerprint().to_string();
                let config = tls::client_config(verifier, tls)?;
                (builder.use_preconfigured_tls(config), Some(fingerprint))
            }
            None => {
                let mut builder = builder.use_rustls_tls();
                if let (Some(cert), Some(key)) = (&tls.client_cert, &tls.client_key) {
                    let mut pem = cert.clone().into_bytes();
                    pem.push(b'\n');
                    pem.extend_from_slice(key.as_bytes());
                    let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                        ClientError::Tls(format!("invalid client certificate: {}", e))
                    })?;
                    builder = builder.identity(identity);
                }
                (builder, None)
            }
        };

        let http = builder
            .build()
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        Ok(Self {
            base,
            http,
            pinned_fingerprint,
        })
    }
}

impl fmt::Debug for HttpsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsTransport")
            .field("base", &self.base)
            .field("pinned", &self.pinned_fingerprint)
            .finish()
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn send(&self, request: Request) -> Result<RawResponse> {
        let url = format!("{}{}", self.base, request.path);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut builder = self.http.request(method, &url);
        if let Some(etag) = &request.etag {
            builder = builder.header(reqwest::header::IF_MATCH, etag.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %url, "Daemon request");

        let resp = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(RawResponse { status, etag, body })
    }

    fn endpoint(&self) -> String {
        self.base.clone()
    }
}

/// Fetches the certificate a daemon presents, without trusting it.
///
/// The handshake is aborted as soon as the certificate arrives, so no request
/// reaches the daemon. Returns the certificate as PEM so it can be pinned on disk.
pub async fn fetch_server_certificate(base: &str) -> Result<String> {
    let verifier = Arc::new(CapturingVerifier::new());
    let config = tls::client_config(verifier.clone(), &TlsConfig::default())?;
    let http = reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ClientError::Tls(e.to_string()))?;

    let url = format!("{}/1.0", base.trim_end_matches('/'));
    let result = http.get(&url).send().await;

    match (verifier.take(), result) {
        (Some(der), _) => Ok(cert::der_to_pem(&der)),
        (None, Err(e)) => Err(ClientError::Transport(e.to_string())),
        (None, Ok(_)) => Err(ClientError::Tls(format!(
            "no server certificate received from {}",
            url
        ))),
    }
}

// =============================================================================
// Connecting
// =============================================================================

/// Where a daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Local unix socket. `None` means the default socket path.
    Unix(Option<PathBuf>),
    /// Base URL such as `https://host:8443`.
    Https(String),
}

impl Endpoint {
    pub fn url(&self) -> String {
        match self {
            Endpoint::Unix(None) => "unix://".to_string(),
            Endpoint::Unix(Some(path)) => format!("unix://{}", path.display()),
            Endpoint::Https(base) => base.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Default unix socket, preferring the snap installation.
pub fn default_unix_socket() -> PathBuf {
    let snap = Path::new("/var/snap/lxd/common/lxd/unix.socket");
    if snap.exists() {
        snap.to_path_buf()
    } else {
        PathBuf::from("/var/lib/lxd/unix.socket")
    }
}

/// Opens transports to daemons.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, endpoint: &Endpoint, tls: &TlsConfig) -> Result<Arc<dyn Transport>>;

    /// Retrieves the certificate an https daemon presents, as PEM.
    async fn fetch_server_certificate(&self, endpoint: &Endpoint) -> Result<String>;
}

/// [`Connector`] reaching real daemons.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaemonConnector;

#[async_trait]
impl Connector for DaemonConnector {
    async fn connect(&self, endpoint: &Endpoint, tls: &TlsConfig) -> Result<Arc<dyn Transport>> {
        match endpoint {
            Endpoint::Unix(path) => {
                let socket = path.clone().unwrap_or_else(default_unix_socket);
                Ok(Arc::new(UnixTransport::new(socket)))
            }
            Endpoint::Https(base) => Ok(Arc::new(HttpsTransport::new(base.clone(), tls)?)),
        }
    }

    async fn fetch_server_certificate(&self, endpoint: &Endpoint) -> Result<String> {
        match endpoint {
            Endpoint::Https(base) => fetch_server_certificate(base).await,
            Endpoint::Unix(_) => Err(ClientError::InvalidAddress(
                "unix sockets do not present certificates".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_ignores_empty_etag() {
        let req = Request::new(Method::Put, "/1.0/networks/br0").with_etag("");
        assert!(req.etag.is_none());

        let req = req.with_etag("abc");
        assert_eq!(req.etag.as_deref(), Some("abc"));
    }

    #[test]
    fn test_unix_endpoint() {
        let transport = UnixTransport::new("/var/lib/lxd/unix.socket");
        assert_eq!(transport.endpoint(), "unix:///var/lib/lxd/unix.socket");
    }

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(Endpoint::Unix(None).url(), "unix://");
        assert_eq!(
            Endpoint::Unix(Some(PathBuf::from("/run/lxd.sock"))).to_string(),
            "unix:///run/lxd.sock"
        );
        assert_eq!(
            Endpoint::Https("https://lxd.example:8443".to_string()).url(),
            "https://lxd.example:8443"
        );
    }

    struct TlsServer {
        base: String,
        pem: String,
        received: tokio::task::JoinHandle<Vec<u8>>,
    }

    /// One-shot TLS server with a fresh self-signed certificate. It answers a
    /// single request with `{}` and reports the plaintext it received.
    async fn tls_server() -> TlsServer {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der().clone()],
            rustls::pki_types::PrivateKeyDer::Pkcs8(key.serialize_der().into()),
        )
        .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("https://{}", listener.local_addr().unwrap());

        let received = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let Ok(mut stream) = acceptor.accept(tcp).await else {
                return Vec::new();
            };
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            buf.truncate(n);
            let reply = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}";
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
            buf
        });

        TlsServer {
            base,
            pem: cert.pem(),
            received,
        }
    }

    #[tokio::test]
    async fn test_pinned_certificate_completes_request() {
        let server = tls_server().await;
        let tls = TlsConfig {
            server_cert: Some(server.pem.clone()),
            ..Default::default()
        };
        let transport = HttpsTransport::new(server.base.clone(), &tls).unwrap();

        let resp = transport
            .send(Request::new(Method::Get, "/1.0"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        let received = server.received.await.unwrap();
        assert!(received.starts_with(b"GET /1.0 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_unpinned_certificate_receives_no_request_data() {
        let server = tls_server().await;
        let tls = TlsConfig {
            server_cert: Some(cert::der_to_pem(b"the certificate we trust")),
            ..Default::default()
        };
        let transport = HttpsTransport::new(server.base.clone(), &tls).unwrap();

        let request = Request::new(Method::Put, "/1.0/storage-pools/tank/buckets/b1/keys/k1")
            .with_body(serde_json::json!({"secret-key": "do-not-leak"}));
        assert!(transport.send(request).await.is_err());

        let received = server.received.await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_server_certificate_sends_no_request() {
        let server = tls_server().await;

        let pem = fetch_server_certificate(&server.base).await.unwrap();
        assert_eq!(
            cert::fingerprint_pem(&pem).unwrap(),
            cert::fingerprint_pem(&server.pem).unwrap()
        );
        assert!(server.received.await.unwrap().is_empty());
    }

    #[test]
    fn test_https_transport_rejects_bad_pinned_certificate() {
        let tls = TlsConfig {
            server_cert: Some("garbage".to_string()),
            ..Default::default()
        };
        assert!(HttpsTransport::new("https://lxd.example:8443", &tls).is_err());
    }
}
