//! Data models for the OpenAI Chat Completions surface and the upstream DuckDuckGo chat API.
//!
//! This module groups two submodules:
//! - `chat`: the OpenAI-compatible request/response types served to clients.
//! - `duckchat`: the upstream wire payload and SSE event shape.
//!
//! The mapping from `chat` messages to `duckchat::DuckChatRequest` lives in `crate::mapper`.

pub mod chat;
pub mod duckchat;

pub use chat::{
    ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatDelta,
    ChatMessage, ChatStreamChoice, ChatUsage, ModelInfo, ModelList, Role,
};
pub use duckchat::{DuckChatEvent, DuckChatMessage, DuckChatRequest};
