use async_trait::async_trait;
use futures_util::TryStreamExt;
use http::header;

use super::{UpstreamRequest, UpstreamResponse, UpstreamTransport};
use crate::error::{Error, Result};

/// Transport that talks to the upstream directly with `reqwest`.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    pub fn new() -> Self {
        // Proxying is handled by TunnelTransport; keep reqwest from reading the env on its own.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for DirectTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamTransport for DirectTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let mut rb = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .header(header::CONNECTION, "close");
        if let Some(body) = request.body {
            rb = rb.body(body);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(e.to_string()));

        Ok(UpstreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
