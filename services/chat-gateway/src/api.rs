//! Chat session HTTP handlers
//!
//! Routes (wired in main.rs):
//! - `POST   /v1/sessions`               open a session
//! - `GET    /v1/sessions/{id}`          transcript
//! - `DELETE /v1/sessions/{id}`          close a session
//! - `POST   /v1/sessions/{id}/messages` send a message, optionally streamed

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use llm_client::{Attachment, AttachmentKind, ClientError, Delivery, Payload, TextStream};
use serde::Deserialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::error::ApiError;
use crate::metrics;
use crate::sessions::{Session, SessionStore};

/// Header carrying the pool slot that served a streamed answer.
const CREDENTIAL_SLOT_HEADER: HeaderName = HeaderName::from_static("x-credential-slot");

/// Handler state for chat routes
#[derive(Clone)]
pub struct ChatState {
    pub sessions: Arc<SessionStore>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// Body of `POST /v1/sessions/{id}/messages`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
    #[serde(default)]
    pub stream: bool,
}

/// Attachment as uploaded: raw bytes in standard base64.
#[derive(Debug, Deserialize)]
pub struct AttachmentUpload {
    pub kind: AttachmentKind,
    pub mime_type: String,
    #[serde(default)]
    pub name: Option<String>,
    pub data: String,
}

impl ChatRequest {
    fn into_payload(self) -> Result<Payload, ApiError> {
        if self.text.trim().is_empty() {
            return Err(ApiError::InvalidRequest("text must not be empty".into()));
        }
        let attachments = self
            .attachments
            .into_iter()
            .enumerate()
            .map(|(i, upload)| {
                upload
                    .decode()
                    .map_err(|e| ApiError::InvalidRequest(format!("attachment {i}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Payload::new(self.text).with_attachments(attachments))
    }
}

impl AttachmentUpload {
    fn decode(self) -> Result<Attachment, String> {
        if self.mime_type.trim().is_empty() {
            return Err("mime_type must not be empty".into());
        }
        let data = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| format!("invalid base64 data: {e}"))?;
        if data.is_empty() {
            return Err("data must not be empty".into());
        }
        let attachment = Attachment::new(self.kind, self.mime_type, data);
        Ok(match self.name {
            Some(name) => attachment.with_name(name),
            None => attachment,
        })
    }
}

impl ChatState {
    /// Count, log and time a handled request; errors become JSON responses.
    fn finish(
        &self,
        route: &'static str,
        start: Instant,
        result: Result<Response, ApiError>,
        request_id: &str,
    ) -> Response {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.errors_total.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, error_type = e.error_type(), "request failed");
                e.into_response_with_id(request_id)
            }
        };
        metrics::record_request(
            response.status().as_u16(),
            route,
            start.elapsed().as_secs_f64(),
        );
        response
    }
}

#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn create_session(state: &ChatState, request_id: String) -> Response {
    let start = Instant::now();
    let result = state.sessions.create().await.map(|session_id| {
        let body = serde_json::json!({
            "session_id": session_id,
            "greeting": state.sessions.greeting(),
        });
        (StatusCode::CREATED, Json(body)).into_response()
    });
    state.finish("sessions", start, result, &request_id)
}

#[instrument(skip_all, fields(request_id = %request_id, session_id = %session_id))]
pub async fn transcript(state: &ChatState, session_id: String, request_id: String) -> Response {
    let start = Instant::now();
    let result = async {
        let handle = state
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| ApiError::SessionNotFound(session_id.clone()))?;
        let session = handle.lock().await;
        let turns: Vec<_> = session
            .history()
            .iter()
            .map(|turn| serde_json::json!({ "role": turn.role.as_str(), "text": turn.text() }))
            .collect();
        Ok::<_, ApiError>(
            Json(serde_json::json!({
                "session_id": session.id(),
                "credential_slot": session.credential_slot(),
                "turns": turns,
            }))
            .into_response(),
        )
    }
    .await;
    state.finish("session", start, result, &request_id)
}

#[instrument(skip_all, fields(request_id = %request_id, session_id = %session_id))]
pub async fn delete_session(state: &ChatState, session_id: String, request_id: String) -> Response {
    let start = Instant::now();
    let result = if state.sessions.remove(&session_id).await {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(ApiError::SessionNotFound(session_id))
    };
    state.finish("session", start, result, &request_id)
}

/// Send one user message through the session's dispatcher.
///
/// The session lock is held until the answer is fully delivered, streamed
/// answers included, so a session serves one message at a time.
#[instrument(skip_all, fields(request_id = %request_id, session_id = %session_id))]
pub async fn post_message(
    state: &ChatState,
    session_id: String,
    request: Result<ChatRequest, ApiError>,
    request_id: String,
) -> Response {
    let start = Instant::now();
    let result = match request {
        Ok(request) => send_message(state, &session_id, request).await,
        Err(e) => Err(e),
    };
    state.finish("messages", start, result, &request_id)
}

async fn send_message(
    state: &ChatState,
    session_id: &str,
    request: ChatRequest,
) -> Result<Response, ApiError> {
    let stream = request.stream;
    let payload = request.into_payload()?;
    let handle = state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| ApiError::SessionNotFound(session_id.to_string()))?;
    let mut session = handle.lock_owned().await;

    if stream {
        let response = session.dispatch(&payload, Delivery::Stream).await?;
        let slot = session.credential_slot();
        info!(slot, "streaming answer");
        let body = Body::from_stream(relay(response.into_stream(), session, payload));
        return Ok((
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (CREDENTIAL_SLOT_HEADER, slot.to_string()),
            ],
            body,
        )
            .into_response());
    }

    let reply = session
        .dispatch(&payload, Delivery::Complete)
        .await?
        .into_text()
        .await
        .map_err(key_pool::Error::from)?;
    session.record_exchange(&payload, reply.clone());
    let slot = session.credential_slot();
    info!(slot, reply_len = reply.len(), "answer delivered");

    Ok(Json(serde_json::json!({
        "reply": reply,
        "credential_slot": slot,
    }))
    .into_response())
}

struct Relay {
    chunks: TextStream,
    session: Option<OwnedMutexGuard<Session>>,
    payload: Payload,
    reply: String,
}

/// Forward chunks to the client. The exchange is recorded only if the
/// stream ends cleanly; an error or a dropped connection leaves the
/// transcript as it was.
fn relay(
    chunks: TextStream,
    session: OwnedMutexGuard<Session>,
    payload: Payload,
) -> impl Stream<Item = Result<Bytes, ClientError>> + Send + 'static {
    let state = Relay {
        chunks,
        session: Some(session),
        payload,
        reply: String::new(),
    };
    futures_util::stream::unfold(state, |mut relay| async move {
        if relay.session.is_none() {
            return None;
        }
        match relay.chunks.next().await {
            Some(Ok(text)) => {
                relay.reply.push_str(&text);
                Some((Ok(Bytes::from(text)), relay))
            }
            Some(Err(e)) => {
                warn!(error = %e, "stream failed mid-answer, transcript unchanged");
                relay.session = None;
                Some((Err(e), relay))
            }
            None => {
                if let Some(mut session) = relay.session.take() {
                    let reply = std::mem::take(&mut relay.reply);
                    debug!(reply_len = reply.len(), "stream complete");
                    session.record_exchange(&relay.payload, reply);
                }
                None
            }
        }
    })
}
