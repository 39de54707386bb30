//! Upstream HTTP transport.
//!
//! Two implementations sit behind [`UpstreamTransport`]:
//! - [`DirectTransport`]: a plain `reqwest` client.
//! - [`TunnelTransport`]: an HTTP CONNECT tunnel through a forward proxy, with the
//!   request itself spoken over a hyper HTTP/1 connection.
//!
//! [`transport_from_env`] picks one based on `https_proxy` / `HTTPS_PROXY`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;

use crate::error::Result;

mod direct;
mod tunnel;

pub use direct::DirectTransport;
pub use tunnel::{open_tunnel, parse_status_line, ProxyAddr, TunnelTransport};

/// Response body as a stream of chunks, in arrival order.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// A single upstream HTTP call.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }

    /// Add a header; values that are not valid header text are skipped with a warning.
    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => tracing::warn!(header = name, "dropping invalid upstream header value"),
        }
        self
    }
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl UpstreamResponse {
    /// Header value as text, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes one upstream request. Connections are not reused across calls.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse>;
}

/// Read the forward proxy from `https_proxy`, then `HTTPS_PROXY`.
pub fn proxy_from_env() -> Option<String> {
    ["https_proxy", "HTTPS_PROXY"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Build the transport for this process: tunneled when a proxy is configured, direct otherwise.
pub fn transport_from_env() -> Arc<dyn UpstreamTransport> {
    match proxy_from_env() {
        Some(raw) => match ProxyAddr::parse(&raw) {
            Ok(proxy) => {
                tracing::info!(proxy = %proxy, "tunneling upstream calls through proxy");
                Arc::new(TunnelTransport::new(proxy))
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparsable proxy URL; using direct transport");
                Arc::new(DirectTransport::new())
            }
        },
        None => Arc::new(DirectTransport::new()),
    }
}
