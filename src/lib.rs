#![forbid(unsafe_code)]
#![doc = r#"
ddgchat

Serve an OpenAI-compatible Chat Completions API backed by the DuckDuckGo chat service.

Crate highlights
- Library: request shaping via `to_duckchat_request(&[ChatMessage], model, &mapping)`.
- Relay: token acquisition, rate-limit retries and incremental SSE parsing (`relay`).
- HTTP server (in `server`): `/v1/models`, `/v1/chat/completions` (JSON or SSE), `/v1/conversations/:id`.

Modules
- `models`: OpenAI chat types and the upstream wire payload.
- `mapper`: history → upstream payload, model alias mapping.
- `token`: VQD token acquisition.
- `transport`: direct and CONNECT-tunneled upstream HTTP.
- `relay`: one upstream chat call as a stream of fragment events.
- `assembler`: fragments → SSE chunks or a single completion.
- `store`: per-conversation message history.
- `server`: Axum router/handlers (the binary uses this).
- `config`, `util`, `error`: TOML config, tracing/CORS helpers, the crate error type.

Note: upstream endpoints and headers are undocumented and may change without notice.
"#]

pub mod assembler;
pub mod config;
pub mod error;
pub mod mapper;
pub mod models;
pub mod relay;
pub mod server;
pub mod sse;
pub mod store;
pub mod token;
pub mod transport;
pub mod util;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::mapper::to_duckchat_request;

// Re-export model namespaces for convenience (downstream users can do `use ddgchat::chat`).
pub use crate::models::{chat, duckchat};
