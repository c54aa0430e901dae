//! OpenAI-compatible chat-completions client
//!
//! Works against any `/chat/completions` endpoint that follows the OpenAI wire
//! format (Groq, OpenRouter, OpenAI). Attachments become content parts:
//! images as `image_url` data URLs, audio as `input_audio`, documents as
//! `file` parts.
//!
//! Error responses are read in full and returned as `ClientError::Http` before
//! any stream is handed out, and so is an error sent as the first stream
//! event, so the dispatcher can always classify them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    ApiKey, Attachment, AttachmentKind, ClientError, ContentPart, Delivery, LlmClient,
    LlmResponse, Payload, Result, Role, TextStream, Turn,
};

/// Groq's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default chat model.
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Longest provider error body passed through to callers.
const MAX_ERROR_BODY: usize = 512;

/// Generation settings applied to every request.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Prepended as a system message when set
    pub system_prompt: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

/// Chat-completions client for OpenAI-compatible providers.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    settings: ChatSettings,
    timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        settings: ChatSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            settings,
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Build the JSON request body: system prompt, history, then the payload.
    pub fn build_body(&self, history: &[Turn], payload: &Payload, delivery: Delivery) -> Value {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.settings.system_prompt {
            messages.push(message_json(Role::System, &[ContentPart::Text(prompt.clone())]));
        }
        for turn in history {
            messages.push(message_json(turn.role, &turn.parts));
        }
        messages.push(message_json(Role::User, &payload.parts()));

        let mut body = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": messages,
            "stream": delivery == Delivery::Stream,
        });
        if let Some(max_tokens) = self.settings.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

impl LlmClient for OpenAiCompatClient {
    fn id(&self) -> &str {
        "openai-compat"
    }

    fn send<'a>(
        &'a self,
        credential: &'a ApiKey,
        history: &'a [Turn],
        payload: &'a Payload,
        delivery: Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse>> + Send + 'a>> {
        Box::pin(async move {
            let body = self.build_body(history, payload, delivery);
            debug!(
                model = %self.settings.model,
                turns = history.len(),
                attachments = payload.attachments().len(),
                ?delivery,
                "sending chat completion"
            );

            let response = self
                .http
                .post(self.endpoint())
                .bearer_auth(credential.expose())
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    message: error_message(&text),
                });
            }

            match delivery {
                Delivery::Complete => {
                    let json: Value = response
                        .json()
                        .await
                        .map_err(|e| ClientError::Decode(e.to_string()))?;
                    parse_completion(&json).map(LlmResponse::Complete)
                }
                Delivery::Stream => {
                    let body = response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(transport_error));
                    let chunks = first_chunk_checked(decode_chunks(body)).await?;
                    Ok(LlmResponse::Stream(chunks))
                }
            }
        })
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Network(e.to_string())
    }
}

/// Serialize one message. Single-text messages use the plain string form that
/// every compatible provider accepts; anything else uses content parts.
fn message_json(role: Role, parts: &[ContentPart]) -> Value {
    let content = match parts {
        [ContentPart::Text(text)] => Value::String(text.clone()),
        _ => Value::Array(parts.iter().map(part_json).collect()),
    };
    json!({ "role": role.as_str(), "content": content })
}

fn part_json(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text(text) => json!({ "type": "text", "text": text }),
        ContentPart::Attachment(attachment) => attachment_json(attachment),
    }
}

fn attachment_json(attachment: &Attachment) -> Value {
    let encoded = STANDARD.encode(&attachment.data);
    match attachment.kind {
        AttachmentKind::Image => json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{encoded}", attachment.mime_type) },
        }),
        AttachmentKind::Audio => json!({
            "type": "input_audio",
            "input_audio": { "data": encoded, "format": audio_format(&attachment.mime_type) },
        }),
        AttachmentKind::Document => json!({
            "type": "file",
            "file": {
                "filename": attachment.name.as_deref().unwrap_or("document.pdf"),
                "file_data": format!("data:{};base64,{encoded}", attachment.mime_type),
            },
        }),
    }
}

/// `input_audio.format` expects a bare codec name.
fn audio_format(mime_type: &str) -> &str {
    match mime_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        other => other.rsplit('/').next().unwrap_or(other),
    }
}

/// Extract a readable message from an error body.
///
/// Handles `{"error":{"message":..}}`, `{"error":".."}` and falls back to the
/// raw body truncated to `MAX_ERROR_BODY` characters.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let error = &json["error"];
        if let Some(message) = error["message"].as_str() {
            return message.to_string();
        }
        if let Some(message) = error.as_str() {
            return message.to_string();
        }
    }
    if body.chars().count() > MAX_ERROR_BODY {
        let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{truncated}... [truncated]")
    } else {
        body.to_string()
    }
}

fn parse_completion(json: &Value) -> Result<String> {
    let choice = &json["choices"][0];
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(ClientError::Blocked("completion stopped by content filter".into()));
    }
    choice["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ClientError::Decode("missing choices[0].message.content".into()))
}

/// Parse one streamed `data:` payload into an optional text delta.
fn parse_delta(data: &str) -> Result<Option<String>> {
    let json: Value =
        serde_json::from_str(data).map_err(|e| ClientError::Decode(format!("stream event: {e}")))?;
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(ClientError::Provider(message.to_string()));
    }
    let choice = &json["choices"][0];
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(ClientError::Blocked("stream stopped by content filter".into()));
    }
    Ok(choice["delta"]["content"]
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_string))
}

/// Turn an SSE byte stream into text chunks.
///
/// Ends at `[DONE]`, at end of body, or after the first error item.
pub fn decode_chunks<S>(body: S) -> TextStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let events = Box::pin(body.eventsource());
    Box::pin(futures_util::stream::unfold(
        Some(events),
        |events| async move {
            let mut events = events?;
            loop {
                let event = match events.next().await? {
                    Ok(event) => event,
                    Err(EventStreamError::Transport(e)) => return Some((Err(e), None)),
                    Err(e) => {
                        return Some((Err(ClientError::Decode(format!("event stream: {e}"))), None));
                    }
                };
                match event.data.as_str() {
                    "" => continue,
                    "[DONE]" => return None,
                    data => match parse_delta(data) {
                        Ok(Some(text)) => return Some((Ok(text), Some(events))),
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), None)),
                    },
                }
            }
        },
    ))
}

/// Wait for the first chunk so a provider error sent as the opening event
/// (HTTP 200, then `{"error":..}`) is returned as an attempt failure instead
/// of surfacing mid-answer.
pub async fn first_chunk_checked(mut chunks: TextStream) -> Result<TextStream> {
    match chunks.next().await {
        Some(Err(e)) => Err(e),
        Some(Ok(first)) => Ok(Box::pin(
            futures_util::stream::once(std::future::ready(Ok(first))).chain(chunks),
        )),
        None => Ok(Box::pin(futures_util::stream::empty::<Result<String>>())),
    }
}
