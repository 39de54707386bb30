use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// What the fake DuckDuckGo chat upstream should do.
#[derive(Clone)]
pub struct UpstreamBehavior {
    /// Fragments sent as `data: {"message": ...}` lines, followed by `data: [DONE]`.
    pub fragments: Vec<String>,
    /// Number of leading chat calls answered with 429.
    pub rate_limited: usize,
    /// Status for chat calls once rate limiting is over.
    pub chat_status: StatusCode,
    /// Whether the status endpoint hands out `x-vqd-4` tokens.
    pub issue_tokens: bool,
}

impl UpstreamBehavior {
    pub fn fragments(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            rate_limited: 0,
            chat_status: StatusCode::OK,
            issue_tokens: true,
        }
    }
}

/// One chat call as seen by the stub.
#[derive(Clone, Debug)]
pub struct RecordedChat {
    pub vqd: Option<String>,
    pub user_agent: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct StubState {
    behavior: UpstreamBehavior,
    warmups: Arc<AtomicUsize>,
    statuses: Arc<AtomicUsize>,
    chats: Arc<Mutex<Vec<RecordedChat>>>,
}

#[derive(Clone)]
pub struct UpstreamStub {
    base_url: String,
    warmups: Arc<AtomicUsize>,
    statuses: Arc<AtomicUsize>,
    chats: Arc<Mutex<Vec<RecordedChat>>>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl UpstreamStub {
    pub async fn start(behavior: UpstreamBehavior) -> Self {
        let warmups = Arc::new(AtomicUsize::new(0));
        let statuses = Arc::new(AtomicUsize::new(0));
        let chats = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            behavior,
            warmups: warmups.clone(),
            statuses: statuses.clone(),
            chats: chats.clone(),
        };

        let router = Router::new()
            .route("/country.json", get(country_handler))
            .route("/duckchat/v1/status", get(status_handler))
            .route("/duckchat/v1/chat", post(chat_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream stub");
        let addr = listener.local_addr().expect("upstream stub local addr");
        let (tx, rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router.into_make_service());
        tokio::spawn(async move {
            tokio::select! {
                res = server => {
                    if let Err(err) = res {
                        eprintln!("Upstream stub server error: {err:?}");
                    }
                }
                _ = rx => {}
            }
        });

        UpstreamStub {
            base_url: format!("http://{}", addr),
            warmups,
            statuses,
            chats,
            shutdown: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn url(&self) -> String {
        self.base_url.clone()
    }

    pub fn warmup_calls(&self) -> usize {
        self.warmups.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.statuses.load(Ordering::SeqCst)
    }

    pub fn chats(&self) -> Vec<RecordedChat> {
        self.chats.lock().expect("lock recorded chats").clone()
    }
}

impl Drop for UpstreamStub {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.shutdown.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn country_handler(State(state): State<StubState>) -> Json<serde_json::Value> {
    state.warmups.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({ "country": "US" }))
}

async fn status_handler(State(state): State<StubState>, headers: HeaderMap) -> Response {
    let n = state.statuses.fetch_add(1, Ordering::SeqCst);
    let wants_token = header(&headers, "x-vqd-accept").as_deref() == Some("1");
    if state.behavior.issue_tokens && wants_token {
        (StatusCode::OK, [("x-vqd-4", format!("vqd-{n}"))], "{}").into_response()
    } else {
        (StatusCode::OK, "{}").into_response()
    }
}

async fn chat_handler(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let call = {
        let mut chats = state.chats.lock().expect("lock recorded chats");
        chats.push(RecordedChat {
            vqd: header(&headers, "x-vqd-4"),
            user_agent: header(&headers, "user-agent"),
            body,
        });
        chats.len()
    };

    if call <= state.behavior.rate_limited {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }
    if state.behavior.chat_status != StatusCode::OK {
        return (state.behavior.chat_status, "upstream error").into_response();
    }

    let mut sse = String::new();
    for fragment in &state.behavior.fragments {
        let event = serde_json::json!({ "role": "assistant", "message": fragment });
        sse.push_str(&format!("data: {event}\n\n"));
    }
    sse.push_str("data: {\"action\":\"success\"}\n\n");
    sse.push_str("data: [DONE]\n");

    (
        StatusCode::OK,
        [("content-type", "text/event-stream")],
        sse,
    )
        .into_response()
}
