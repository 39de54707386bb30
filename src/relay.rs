//! Upstream chat relay.
//!
//! One relay run acquires a token, POSTs the chat payload, retries on `429`
//! (bounded by [`MAX_RETRIES`]) and forwards each parsed fragment over a
//! channel. Runs execute on their own tokio task and stop as soon as their
//! [`CancellationToken`] fires.

use bytes::Bytes;
use futures_util::StreamExt;
use http::StatusCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::UserAgentPolicy;
use crate::error::{Error, Result};
use crate::models::duckchat::DuckChatRequest;
use crate::sse::{classify_line, LineDecoder, UpstreamLine};
use crate::token::{TokenProvider, VQD_HEADER};
use crate::transport::{UpstreamRequest, UpstreamResponse, UpstreamTransport};

/// Retries allowed after the first attempt when the upstream answers `429`.
pub const MAX_RETRIES: u32 = 5;

const EVENT_BUFFER: usize = 64;

/// Events delivered to the response assembler, in upstream order.
#[derive(Debug)]
pub enum RelayEvent {
    Fragment(String),
    Done,
    Failed(Error),
}

pub struct StreamRelay {
    transport: Arc<dyn UpstreamTransport>,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
    user_agents: UserAgentPolicy,
}

impl StreamRelay {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        tokens: Arc<dyn TokenProvider>,
        base_url: impl Into<String>,
        user_agents: UserAgentPolicy,
    ) -> Self {
        Self {
            transport,
            tokens,
            base_url: base_url.into(),
            user_agents,
        }
    }

    /// Start a relay run on a new task and return its event stream.
    ///
    /// The stream ends with exactly one `Done` or `Failed`, unless `cancel`
    /// fires first, in which case it simply closes.
    pub fn spawn(
        self: &Arc<Self>,
        payload: DuckChatRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("relay cancelled");
                }
                _ = relay.run(&payload, &tx) => {}
            }
        });
        rx
    }

    async fn run(&self, payload: &DuckChatRequest, tx: &mpsc::Sender<RelayEvent>) {
        let terminal = match self.drive(payload, tx).await {
            Ok(()) => RelayEvent::Done,
            Err(e) => {
                tracing::error!(error = %e, "failed to chat with duckduckgo");
                RelayEvent::Failed(e)
            }
        };
        let _ = tx.send(terminal).await;
    }

    async fn drive(&self, payload: &DuckChatRequest, tx: &mpsc::Sender<RelayEvent>) -> Result<()> {
        tracing::debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            "chat with duckduckgo"
        );
        let body = Bytes::from(serde_json::to_vec(payload)?);
        let response = self.send_with_retry(body).await?;
        self.forward(response, tx).await
    }

    /// Send the chat request, re-acquiring a token before every attempt.
    async fn send_with_retry(&self, body: Bytes) -> Result<UpstreamResponse> {
        let mut retries = 0u32;
        loop {
            let user_agent = self.user_agents.pick();
            let token = self.tokens.acquire(&user_agent).await?;

            let url = format!("{}/duckchat/v1/chat", self.base_url);
            let request = UpstreamRequest::post(url, body.clone())
                .header("content-type", "application/json")
                .header("accept", "text/event-stream")
                .header("user-agent", &user_agent)
                .header(VQD_HEADER, &token);
            let response = self.transport.send(request).await?;

            match response.status {
                StatusCode::OK => return Ok(response),
                StatusCode::TOO_MANY_REQUESTS if retries < MAX_RETRIES => {
                    retries += 1;
                    tracing::warn!(
                        attempt = retries,
                        max_retries = MAX_RETRIES,
                        "rate limit exceeded, retrying"
                    );
                }
                status => {
                    tracing::error!(
                        status = status.as_u16(),
                        retries,
                        "upstream chat request failed"
                    );
                    return Err(Error::UpstreamRequest {
                        status: status.as_u16(),
                    });
                }
            }
        }
    }

    /// Parse the SSE body as it arrives and forward fragments until `[DONE]` or EOF.
    async fn forward(
        &self,
        response: UpstreamResponse,
        tx: &mpsc::Sender<RelayEvent>,
    ) -> Result<()> {
        let mut body = response.body;
        let mut decoder = LineDecoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk)? {
                if !Self::dispatch(&line, tx).await {
                    return Ok(());
                }
            }
        }
        if let Some(line) = decoder.finish() {
            Self::dispatch(&line, tx).await;
        }
        Ok(())
    }

    /// Handle one line; returns false once the relay should stop reading.
    async fn dispatch(line: &str, tx: &mpsc::Sender<RelayEvent>) -> bool {
        match classify_line(line) {
            Ok(UpstreamLine::Fragment(text)) => tx.send(RelayEvent::Fragment(text)).await.is_ok(),
            Ok(UpstreamLine::Done) => false,
            Ok(UpstreamLine::Skip) => true,
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable upstream event");
                true
            }
        }
    }
}
