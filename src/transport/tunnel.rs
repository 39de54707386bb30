use async_trait::async_trait;
use futures_util::TryStreamExt;
use http::{header, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use reqwest::Url;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{UpstreamRequest, UpstreamResponse, UpstreamTransport};
use crate::error::{Error, Result};

/// Upper bound on the proxy's CONNECT reply head.
const MAX_CONNECT_HEAD: usize = 8 * 1024;

/// Forward proxy endpoint (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddr {
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    /// Parse `http://host:port`, `https://host:port` or a bare `host:port`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::Proxy(format!("invalid proxy URL {raw:?}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Proxy(format!("proxy URL has no host: {raw:?}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Proxy(format!("proxy URL has no port: {raw:?}")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse an HTTP/1.x status line such as `HTTP/1.1 200 Connection established`.
pub fn parse_status_line(line: &str) -> Result<StatusCode> {
    let mut parts = line.trim_end().splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(Error::Proxy(format!("malformed status line: {line:?}")));
    }
    let code = parts
        .next()
        .filter(|c| c.len() == 3 && c.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Proxy(format!("malformed status line: {line:?}")))?;
    StatusCode::from_bytes(code.as_bytes())
        .map_err(|_| Error::Proxy(format!("malformed status line: {line:?}")))
}

/// Read the reply head byte by byte so nothing past the blank line is consumed.
async fn read_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::with_capacity(128);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_HEAD {
            return Err(Error::Proxy("CONNECT reply head too large".into()));
        }
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| Error::Proxy(format!("error reading CONNECT response: {e}")))?;
        head.push(byte);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Open a TCP connection to `proxy` and ask it to tunnel to `host:port`.
///
/// The returned stream is positioned right after the proxy's reply head.
pub async fn open_tunnel(proxy: &ProxyAddr, host: &str, port: u16) -> Result<TcpStream> {
    tracing::debug!(proxy = %proxy, host, port, "dialing proxy");
    let mut stream = TcpStream::connect(proxy.authority())
        .await
        .map_err(|e| Error::Proxy(format!("error connecting to proxy {proxy}: {e}")))?;

    let authority = format!("{host}:{port}");
    let connect = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream
        .write_all(connect.as_bytes())
        .await
        .map_err(|e| Error::Proxy(format!("error sending CONNECT: {e}")))?;

    let head = read_head(&mut stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    let status = parse_status_line(status_line)?;
    if !status.is_success() {
        tracing::error!(proxy = %proxy, reply = status_line, "proxy refused CONNECT");
        return Err(Error::Proxy(format!(
            "proxy refused CONNECT to {authority}: {status_line}"
        )));
    }
    Ok(stream)
}

/// Transport that reaches the upstream through an HTTP CONNECT tunnel.
#[derive(Debug, Clone)]
pub struct TunnelTransport {
    proxy: ProxyAddr,
}

impl TunnelTransport {
    pub fn new(proxy: ProxyAddr) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl UpstreamTransport for TunnelTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let url = Url::parse(&request.url)
            .map_err(|e| Error::Transport(format!("invalid upstream URL {}: {e}", request.url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Transport(format!("upstream URL has no host: {url}")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Transport(format!("upstream URL has no port: {url}")))?;

        let stream = open_tunnel(&self.proxy, &host, port).await?;

        match url.scheme() {
            "https" => {
                let connector = tokio_native_tls::native_tls::TlsConnector::new()
                    .map_err(|e| Error::Transport(format!("TLS setup failed: {e}")))?;
                let tls = tokio_native_tls::TlsConnector::from(connector)
                    .connect(&host, stream)
                    .await
                    .map_err(|e| Error::Transport(format!("TLS handshake failed: {e}")))?;
                exchange(tls, request, &url).await
            }
            "http" => exchange(stream, request, &url).await,
            other => Err(Error::Transport(format!(
                "unsupported upstream scheme: {other}"
            ))),
        }
    }
}

/// Speak one HTTP/1.1 request/response over an established tunnel.
async fn exchange<S>(io: S, request: UpstreamRequest, url: &Url) -> Result<UpstreamResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "tunneled connection ended with error");
        }
    });

    let host_header = match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    let path = match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    };

    let mut builder = http::Request::builder().method(request.method).uri(path);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(request.headers);
        if let Ok(v) = HeaderValue::from_str(&host_header) {
            headers.insert(header::HOST, v);
        }
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    let req = builder
        .body(Full::new(request.body.unwrap_or_default()))
        .map_err(|e| Error::Internal(format!("invalid upstream request: {e}")))?;

    let resp = sender.send_request(req).await?;
    let (parts, body) = resp.into_parts();
    let body = body.into_data_stream().map_err(Error::from);

    Ok(UpstreamResponse {
        status: parts.status,
        headers: parts.headers,
        body: Box::pin(body),
    })
}
