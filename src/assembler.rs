//! Turns relay events into client output.
//!
//! - [`ResponseAssembler::stream`]: OpenAI `chat.completion.chunk` SSE frames.
//! - [`ResponseAssembler::complete`]: a single `chat.completion` object.
//!
//! Both race the relay against an idle deadline that restarts on every relay
//! event. When it fires, or the caller drops the output, the relay's
//! cancellation token is triggered.

use bytes::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::chat::{
    ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatDelta, ChatMessage,
    ChatStreamChoice, ChatUsage,
};
use crate::relay::RelayEvent;
use crate::sse::{data_frame, done_frame};
use crate::store::ConversationStore;
use crate::util::unix_now;

const FINISH_STOP: &str = "stop";

/// What the assembler needs to know about the request being answered.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    pub conversation_id: String,
    /// Model name as the client asked for it.
    pub model: String,
    /// History the prompt was built from (used for usage estimates).
    pub history: Vec<ChatMessage>,
}

/// Whitespace word count, the crate's stand-in for token counting.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[derive(Clone)]
pub struct ResponseAssembler {
    store: Arc<dyn ConversationStore>,
    deadline: Duration,
}

enum Step {
    Event(Option<RelayEvent>),
    Timeout,
}

impl ResponseAssembler {
    pub fn new(store: Arc<dyn ConversationStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Aggregate all fragments into one completion.
    pub async fn complete(
        &self,
        ctx: &CompletionContext,
        mut events: mpsc::Receiver<RelayEvent>,
        cancel: CancellationToken,
    ) -> Result<ChatCompletionResponse> {
        let _guard = cancel.drop_guard();
        let sleep = tokio::time::sleep(self.deadline);
        tokio::pin!(sleep);

        let mut full = String::new();
        loop {
            tokio::select! {
                biased;
                ev = events.recv() => {
                    sleep.as_mut().reset(Instant::now() + self.deadline);
                    match ev {
                        Some(RelayEvent::Fragment(text)) => full.push_str(&text),
                        Some(RelayEvent::Done) => break,
                        Some(RelayEvent::Failed(e)) => return Err(e),
                        None => return Err(relay_closed()),
                    }
                }
                _ = &mut sleep => {
                    tracing::error!(
                        conversation_id = %ctx.conversation_id,
                        "response generation timeout"
                    );
                    return Err(Error::Timeout(self.deadline));
                }
            }
        }

        let prompt_tokens: u64 = ctx.history.iter().map(|m| word_count(&m.content)).sum();
        let completion_tokens = word_count(&full);
        let message = ChatMessage::assistant(full);

        let response = ChatCompletionResponse {
            id: ctx.conversation_id.clone(),
            object: "chat.completion".to_string(),
            created: unix_now(),
            model: ctx.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: message.clone(),
                finish_reason: Some(FINISH_STOP.to_string()),
            }],
            usage: ChatUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        };

        self.store.append(&ctx.conversation_id, message).await;
        Ok(response)
    }

    /// Re-frame fragments as OpenAI streaming chunks.
    ///
    /// Success ends with a `finish_reason: "stop"` chunk and `data: [DONE]`;
    /// a relay failure ends with a single `data: {"error": ...}` frame; a timeout
    /// ends the stream without a trailer.
    pub fn stream(
        &self,
        ctx: CompletionContext,
        mut events: mpsc::Receiver<RelayEvent>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let deadline = self.deadline;
        // Owned by the stream from creation, not from its first poll.
        let guard = cancel.drop_guard();

        async_stream::stream! {
            let _guard = guard;
            let sleep = tokio::time::sleep(deadline);
            tokio::pin!(sleep);
            let mut full = String::new();

            loop {
                let step = tokio::select! {
                    biased;
                    ev = events.recv() => Step::Event(ev),
                    _ = &mut sleep => Step::Timeout,
                };
                if let Step::Event(_) = step {
                    sleep.as_mut().reset(Instant::now() + deadline);
                }

                match step {
                    Step::Event(Some(RelayEvent::Fragment(text))) => {
                        full.push_str(&text);
                        let delta = ChatDelta { content: Some(text) };
                        match data_frame(&chunk(&ctx, delta, None)) {
                            Ok(frame) => yield Ok(frame),
                            Err(e) => {
                                tracing::error!(error = %e, "error marshaling response");
                                break;
                            }
                        }
                    }
                    Step::Event(Some(RelayEvent::Done)) => {
                        let stop = chunk(&ctx, ChatDelta::default(), Some(FINISH_STOP));
                        if let Ok(frame) = data_frame(&stop) {
                            yield Ok(frame);
                        }
                        yield Ok(done_frame());
                        store
                            .append(
                                &ctx.conversation_id,
                                ChatMessage::assistant(std::mem::take(&mut full)),
                            )
                            .await;
                        break;
                    }
                    Step::Event(Some(RelayEvent::Failed(e))) => {
                        if let Ok(frame) = data_frame(&e.to_body()) {
                            yield Ok(frame);
                        }
                        break;
                    }
                    Step::Event(None) => {
                        if let Ok(frame) = data_frame(&relay_closed().to_body()) {
                            yield Ok(frame);
                        }
                        break;
                    }
                    Step::Timeout => {
                        tracing::error!(
                            conversation_id = %ctx.conversation_id,
                            "stream response timeout"
                        );
                        break;
                    }
                }
            }
        }
    }
}

fn relay_closed() -> Error {
    Error::Internal("upstream relay ended without completing".into())
}

fn chunk(
    ctx: &CompletionContext,
    delta: ChatDelta,
    finish_reason: Option<&str>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: ctx.conversation_id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: unix_now(),
        model: ctx.model.clone(),
        choices: vec![ChatStreamChoice {
            index: 0,
            delta,
            finish_reason: finish_reason.map(str::to_string),
        }],
    }
}
