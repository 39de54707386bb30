use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::assembler::{CompletionContext, ResponseAssembler};
use crate::config::Config;
use crate::error::Error;
use crate::mapper::to_duckchat_request;
use crate::models::chat::{ChatCompletionRequest, ModelInfo, ModelList};
use crate::relay::StreamRelay;
use crate::store::{ConversationStore, InMemoryConversationStore};
use crate::token::VqdTokenProvider;
use crate::transport::{transport_from_env, UpstreamTransport};
use crate::util::{bearer_token, cors_layer, unix_now};

/// Shared application state used by the HTTP server and handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub relay: Arc<StreamRelay>,
    pub assembler: ResponseAssembler,
}

impl AppState {
    /// State wired to the process environment (proxy selection) and an in-memory store.
    pub fn from_config(config: Config) -> Self {
        Self::with_transport(config, transport_from_env())
    }

    pub fn with_transport(config: Config, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self::with_parts(config, transport, Arc::new(InMemoryConversationStore::new()))
    }

    pub fn with_parts(
        config: Config,
        transport: Arc<dyn UpstreamTransport>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let base = config.api_base();
        let tokens = Arc::new(VqdTokenProvider::new(Arc::clone(&transport), base.clone()));
        let relay = Arc::new(StreamRelay::new(
            transport,
            tokens,
            base,
            config.user_agent_policy(),
        ));
        let assembler = ResponseAssembler::new(Arc::clone(&store), config.timeout());
        Self {
            config: Arc::new(config),
            store,
            relay,
            assembler,
        }
    }
}

/// Build the Axum router: health routes at the root, the OpenAI surface under `/v1`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/models", get(list_models))
        .route("/chat/completions", post(chat_completions))
        .route("/conversations/:id", delete(end_conversation))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/", get(hello))
        .route("/live", get(health))
        .route("/ready", get(health))
        .nest("/v1", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer()),
        )
}

/// Bind `config.listen_addr()` and serve until the process exits.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(listen_addr = %addr, "Starting server");
    axum::serve(listener, build_router(AppState::from_config(config))).await?;
    Ok(())
}

/// Check the bearer header against the allow-list; an empty list admits everyone.
fn check_bearer(tokens: &[String], headers: &HeaderMap) -> Result<(), Error> {
    if tokens.is_empty() {
        return Ok(());
    }
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match bearer_token(auth) {
        None => {
            tracing::error!("no authorization header");
            Err(Error::Auth("missing bearer token".into()))
        }
        Some(token) if tokens.iter().any(|t| t == token) => Ok(()),
        Some(_) => {
            tracing::error!("invalid token");
            Err(Error::Auth("invalid bearer token".into()))
        }
    }
}

async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check_bearer(&state.config.tokens, req.headers()) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

async fn hello() -> &'static str {
    "Hello, World!"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let created = unix_now();
    let data = state
        .config
        .model_mapping
        .keys()
        .map(|id| ModelInfo {
            id: id.clone(),
            object: "model".to_string(),
            created,
            owned_by: "custom".to_string(),
        })
        .collect();
    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

/// OpenAI-compatible chat completions.
/// - Non-streaming: one `chat.completion` JSON object
/// - Streaming: `chat.completion.chunk` SSE frames terminated by `data: [DONE]`
async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => return Error::BadRequest(rejection.body_text()).into_response(),
    };
    if req.messages.is_empty() {
        return Error::BadRequest("messages must not be empty".into()).into_response();
    }

    let conversation_id = Uuid::new_v4().to_string();
    tracing::debug!(
        conversation_id = %conversation_id,
        model = %req.model,
        stream = req.stream,
        "received chat completions request"
    );

    state.store.put(&conversation_id, req.messages).await;
    let history = state.store.get(&conversation_id).await;
    let payload = to_duckchat_request(&history, &req.model, &state.config.model_mapping);

    let cancel = CancellationToken::new();
    let events = state.relay.spawn(payload, cancel.clone());
    let ctx = CompletionContext {
        conversation_id,
        model: req.model,
        history,
    };

    if req.stream {
        sse_response(state.assembler.stream(ctx, events, cancel))
    } else {
        match state.assembler.complete(&ctx, events, cancel).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

async fn end_conversation(Path(id): Path<String>) -> Response {
    tracing::debug!(conversation_id = %id, "end conversation requested");
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({ "error": "not implemented" })),
    )
        .into_response()
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
