//! Per-request API errors and their HTTP mapping
//!
//! Every failure a chat request can hit ends up here and is rendered as
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session limit reached ({0} active sessions)")]
    TooManySessions(usize),

    #[error(transparent)]
    Dispatch(#[from] key_pool::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManySessions(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Dispatch(key_pool::Error::PoolExhausted { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Dispatch(key_pool::Error::Upstream(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Dispatch(key_pool::Error::EmptyPool) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::TooManySessions(_) => "too_many_sessions",
            ApiError::Dispatch(key_pool::Error::PoolExhausted { .. }) => "pool_exhausted",
            ApiError::Dispatch(key_pool::Error::Upstream(_)) => "upstream_error",
            ApiError::Dispatch(key_pool::Error::EmptyPool) => "internal_error",
        }
    }

    /// Text shown to the caller. Exhaustion hides the last provider error.
    pub fn message(&self) -> String {
        match self {
            ApiError::Dispatch(e) => e.user_message(),
            other => other.to_string(),
        }
    }

    pub fn into_response_with_id(self, request_id: &str) -> Response {
        error_response(self.status(), self.error_type(), &self.message(), request_id)
    }
}

pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_client::ClientError;

    #[test]
    fn status_and_type_per_variant() {
        let cases = [
            (
                ApiError::InvalidRequest("text must not be empty".into()),
                StatusCode::BAD_REQUEST,
                "invalid_request",
            ),
            (
                ApiError::SessionNotFound("abc".into()),
                StatusCode::NOT_FOUND,
                "session_not_found",
            ),
            (
                ApiError::TooManySessions(10),
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_sessions",
            ),
            (
                ApiError::Dispatch(key_pool::Error::PoolExhausted {
                    attempts: 3,
                    last_error: "429".into(),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
                "pool_exhausted",
            ),
            (
                ApiError::Dispatch(ClientError::Timeout.into()),
                StatusCode::BAD_GATEWAY,
                "upstream_error",
            ),
        ];
        for (err, status, error_type) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.error_type(), error_type, "{err}");
        }
    }

    #[test]
    fn exhausted_message_is_user_facing() {
        let err = ApiError::Dispatch(key_pool::Error::PoolExhausted {
            attempts: 2,
            last_error: "HTTP 429: rate limit reached for key gsk_...".into(),
        });
        assert_eq!(err.message(), key_pool::error::EXHAUSTED_USER_MESSAGE);
    }

    #[test]
    fn upstream_message_passes_through() {
        let err = ApiError::Dispatch(
            ClientError::Http {
                status: 400,
                message: "Unsupported MIME type".into(),
            }
            .into(),
        );
        assert!(err.message().contains("Unsupported MIME type"));
    }

    #[tokio::test]
    async fn response_body_has_error_envelope() {
        let response = ApiError::SessionNotFound("s1".into()).into_response_with_id("req_1");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "session_not_found");
        assert_eq!(json["error"]["request_id"], "req_1");
        assert!(json["error"]["message"].as_str().unwrap().contains("s1"));
    }
}
