#![allow(dead_code)]

pub mod upstream_stub;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http;
use ddgchat::config::{Config, UserAgentPolicy};
use ddgchat::server::{build_router, AppState};
use ddgchat::store::InMemoryConversationStore;
use ddgchat::transport::DirectTransport;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use upstream_stub::{UpstreamBehavior, UpstreamStub};

/// The real router bound to an ephemeral local port, wired to a stub upstream.
pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub store: Arc<InMemoryConversationStore>,
    join: JoinHandle<()>,
    client: reqwest::Client,
}

impl TestServer {
    /// Create a reqwest client with sensible defaults for tests.
    fn make_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()
            .expect("failed building reqwest client")
    }

    /// Perform a GET relative to the server base URL.
    pub async fn get(
        &self,
        path: &str,
        auth_bearer: Option<&str>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut rb = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(b) = auth_bearer {
            rb = rb.bearer_auth(b);
        }
        rb.send().await
    }

    /// Perform a DELETE relative to the server base URL.
    pub async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    /// Perform a POST with JSON body.
    pub async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
        auth_bearer: Option<&str>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut rb = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(b) = auth_bearer {
            rb = rb.bearer_auth(b);
        }
        rb.json(body).send().await
    }

    /// Low-level POST with raw bytes.
    pub async fn post_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header(http::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// Config pointing at `upstream_url` with a fixed user agent.
pub fn test_config(upstream_url: &str, tokens: &[&str]) -> Config {
    Config {
        host: "127.0.0.1".into(),
        ddg_chat_api_url: upstream_url.to_string(),
        user_agent: "ddgchat-tests/1.0".into(),
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        ..Config::default()
    }
}

/// Spawn the application router on an ephemeral port.
pub async fn spawn_app(config: Config) -> TestServer {
    assert!(matches!(config.user_agent_policy(), UserAgentPolicy::Fixed(_)));
    let store = Arc::new(InMemoryConversationStore::new());
    let state = AppState::with_parts(config, Arc::new(DirectTransport::new()), store.clone());
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let base_url = format!("http://{}", addr);
    let server = axum::serve(listener, app.into_make_service());

    let join = tokio::spawn(async move {
        if let Err(e) = server.await {
            eprintln!("Test server error: {e:?}");
        }
    });

    TestServer {
        base_url,
        addr,
        store,
        join,
        client: TestServer::make_client(),
    }
}

/// Start a stub upstream with `behavior` and an app server in front of it.
pub async fn spawn_with_upstream(
    behavior: UpstreamBehavior,
    tokens: &[&str],
) -> (TestServer, UpstreamStub) {
    let upstream = UpstreamStub::start(behavior).await;
    let server = spawn_app(test_config(&upstream.url(), tokens)).await;
    (server, upstream)
}

/// The end-to-end request body used across tests.
pub fn sample_chat_request(stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": "ddg/gpt-4o-mini",
        "messages": [
            {"role": "system", "content": "Be terse"},
            {"role": "user", "content": "Hi"}
        ],
        "stream": stream
    })
}

/// Split an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}
