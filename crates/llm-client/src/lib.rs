//! LLM client abstraction for chat completions
//!
//! Defines the `LlmClient` trait that decouples credential rotation from the
//! provider wire protocol. The dispatcher hands a client one credential at a
//! time together with the conversation; the client either answers or fails
//! with a `ClientError` that `classify_error` maps onto a retry strategy.
//!
//! `OpenAiCompatClient` speaks the OpenAI-compatible `/chat/completions`
//! protocol (Groq, OpenRouter, OpenAI) with optional SSE streaming.

pub mod classify;
pub mod message;
pub mod openai;

pub use common::ApiKey;
pub use message::{Attachment, AttachmentKind, ContentPart, Payload, Role, Turn};
pub use openai::{ChatSettings, OpenAiCompatClient};

use futures_util::{Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Classification of a failed attempt, driving the dispatcher's next move.
///
/// - QuotaOrAuth rotates to the next credential immediately
/// - Transient waits and retries on the same credential
/// - Other is terminal and surfaces to the caller unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Quota exceeded, resource exhausted, or the key itself was rejected
    QuotaOrAuth,
    /// Service temporarily unavailable / overloaded
    Transient,
    /// Anything else (bad request, content filter, network)
    Other,
}

impl FailureClass {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureClass::QuotaOrAuth => "quota_or_auth",
            FailureClass::Transient => "transient",
            FailureClass::Other => "other",
        }
    }
}

/// How the caller wants the answer delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Single value once the model has finished
    Complete,
    /// Incremental text chunks as they arrive
    Stream,
}

/// Errors from a single call to the provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("provider returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid provider response: {0}")]
    Decode(String),

    #[error("response blocked by content filter: {0}")]
    Blocked(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Lazy, finite, non-restartable sequence of text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A successful provider answer.
pub enum LlmResponse {
    Complete(String),
    Stream(TextStream),
}

impl LlmResponse {
    /// Drain the response into a single string.
    ///
    /// A stream that fails mid-way returns the error; chunks received before
    /// the failure are discarded.
    pub async fn into_text(self) -> Result<String> {
        match self {
            LlmResponse::Complete(text) => Ok(text),
            LlmResponse::Stream(mut chunks) => {
                let mut text = String::new();
                while let Some(chunk) = chunks.next().await {
                    text.push_str(&chunk?);
                }
                Ok(text)
            }
        }
    }

    /// View the response as a chunk stream regardless of delivery mode.
    pub fn into_stream(self) -> TextStream {
        match self {
            LlmResponse::Stream(chunks) => chunks,
            LlmResponse::Complete(text) => {
                Box::pin(futures_util::stream::once(async move { Ok(text) }))
            }
        }
    }
}

impl fmt::Debug for LlmResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmResponse::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            LlmResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Abstraction over a chat-completion provider.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn LlmClient>`).
pub trait LlmClient: Send + Sync {
    /// Identifier for logging (e.g. "openai-compat")
    fn id(&self) -> &str;

    /// Send one attempt with the given credential.
    ///
    /// Provider-side failures must be reported before a stream is returned so
    /// that they can be classified; a returned stream only fails on transport
    /// or decode errors mid-answer.
    fn send<'a>(
        &'a self,
        credential: &'a ApiKey,
        history: &'a [Turn],
        payload: &'a Payload,
        delivery: Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse>> + Send + 'a>>;

    /// Map a failure onto the rotation/retry taxonomy.
    fn classify_error(&self, error: &ClientError) -> FailureClass {
        classify::classify(error)
    }
}
