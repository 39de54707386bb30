use axum::response::{IntoResponse, Response};
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while serving a chat completion.
///
/// Every variant renders as `{"error": "<message>"}`; see [`Error::status_code`]
/// for the HTTP status each one maps to.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("failed to get VQD token: {0}")]
    UpstreamToken(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("unexpected status code: {status}")]
    UpstreamRequest { status: u16 },

    #[error("malformed event line: {0}")]
    Parse(String),

    #[error("response generation timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body shared by plain responses and mid-stream error events.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialize error: {e}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.to_body())).into_response()
    }
}
