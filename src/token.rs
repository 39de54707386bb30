//! VQD token acquisition.
//!
//! The upstream hands out a session token through a status endpoint. A fresh one
//! is fetched for every chat attempt; nothing is cached.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::{UpstreamRequest, UpstreamTransport};

pub const VQD_HEADER: &str = "x-vqd-4";
pub const VQD_ACCEPT_HEADER: &str = "x-vqd-accept";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a fresh token using the given user agent.
    async fn acquire(&self, user_agent: &str) -> Result<String>;
}

/// Fetches tokens from `{base}/country.json` then `{base}/duckchat/v1/status`.
pub struct VqdTokenProvider {
    transport: Arc<dyn UpstreamTransport>,
    base_url: String,
}

impl VqdTokenProvider {
    pub fn new(transport: Arc<dyn UpstreamTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for VqdTokenProvider {
    async fn acquire(&self, user_agent: &str) -> Result<String> {
        tracing::debug!("updating VQD token");

        let warm_up = UpstreamRequest::get(format!("{}/country.json", self.base_url))
            .header("user-agent", user_agent);
        let resp = self.transport.send(warm_up).await.map_err(|e| {
            tracing::error!(error = %e, "failed to get country.json");
            Error::UpstreamToken(e.to_string())
        })?;
        tracing::debug!(status = %resp.status, "warm-up request done");

        let status = UpstreamRequest::get(format!("{}/duckchat/v1/status", self.base_url))
            .header("user-agent", user_agent)
            .header(VQD_ACCEPT_HEADER, "1");
        let resp = self.transport.send(status).await.map_err(|e| {
            tracing::error!(error = %e, "failed to get duckchat/v1/status");
            Error::UpstreamToken(e.to_string())
        })?;

        match resp.header_str(VQD_HEADER).map(str::trim) {
            Some(token) if !token.is_empty() => {
                tracing::debug!(vqd_token = token, "got VQD token");
                Ok(token.to_string())
            }
            _ => {
                tracing::error!(status = %resp.status, "status response carried no VQD token");
                Err(Error::UpstreamToken(format!(
                    "status response ({}) carried no {VQD_HEADER} header",
                    resp.status
                )))
            }
        }
    }
}
