//! Failure classification for provider errors
//!
//! The one place that knows how providers spell "your key is out of quota" or
//! "try again later". Providers report the same condition through different
//! status codes and message strings, so status codes are checked first and
//! message signatures second.

use crate::{ClientError, FailureClass};

/// Message fragments that mean the key itself was rejected.
const BAD_KEY_PATTERNS: &[&str] = &[
    "api key not valid",
    "invalid api key",
    "api_key_invalid",
    "incorrect api key",
    "invalid_api_key",
];

/// Message fragments that mean the key is out of quota or not permitted.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "resource exhausted",
    "resource_exhausted",
    "rate limit",
    "rate_limit",
    "permission denied",
    "permission_denied",
    "unauthorized",
];

/// Message fragments that mean the service is temporarily overloaded.
const OVERLOAD_PATTERNS: &[&str] = &["overloaded", "temporarily unavailable"];

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// Classify an HTTP error response by status and message.
///
/// 401/403/429 rotate. A 400 rotates only when it carries a bad-key
/// signature. 503/529 and explicit overload messages retry on the same key.
pub fn classify_status(status: u16, message: &str) -> FailureClass {
    match status {
        401 | 403 | 429 => FailureClass::QuotaOrAuth,
        400 if contains_any(message, BAD_KEY_PATTERNS) => FailureClass::QuotaOrAuth,
        503 | 529 => FailureClass::Transient,
        _ if contains_any(message, OVERLOAD_PATTERNS) => FailureClass::Transient,
        _ => FailureClass::Other,
    }
}

/// Classify a provider error that arrived without a status code.
pub fn classify_message(message: &str) -> FailureClass {
    if contains_any(message, BAD_KEY_PATTERNS) || contains_any(message, QUOTA_PATTERNS) {
        FailureClass::QuotaOrAuth
    } else if contains_any(message, OVERLOAD_PATTERNS)
        || contains_any(message, &["unavailable", "503"])
    {
        FailureClass::Transient
    } else {
        FailureClass::Other
    }
}

/// Classify any client error.
///
/// Transport, decode and content-filter failures are never retried.
pub fn classify(error: &ClientError) -> FailureClass {
    match error {
        ClientError::Http { status, message } => classify_status(*status, message),
        ClientError::Provider(message) => classify_message(message),
        ClientError::Network(_)
        | ClientError::Timeout
        | ClientError::Decode(_)
        | ClientError::Blocked(_) => FailureClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_rotates() {
        assert_eq!(
            classify_status(429, "Rate limit reached for model llama-3.3-70b-versatile"),
            FailureClass::QuotaOrAuth
        );
    }

    #[test]
    fn status_401_and_403_rotate() {
        assert_eq!(classify_status(401, "Invalid API Key"), FailureClass::QuotaOrAuth);
        assert_eq!(classify_status(403, "forbidden"), FailureClass::QuotaOrAuth);
    }

    #[test]
    fn status_400_with_bad_key_signature_rotates() {
        assert_eq!(
            classify_status(400, "API key not valid. Please pass a valid API key."),
            FailureClass::QuotaOrAuth
        );
        assert_eq!(
            classify_status(400, r#"{"reason":"API_KEY_INVALID"}"#),
            FailureClass::QuotaOrAuth
        );
    }

    #[test]
    fn plain_400_is_terminal() {
        assert_eq!(
            classify_status(400, "messages: content must not be empty"),
            FailureClass::Other
        );
    }

    #[test]
    fn status_503_and_529_are_transient() {
        assert_eq!(classify_status(503, "Service Unavailable"), FailureClass::Transient);
        assert_eq!(classify_status(529, ""), FailureClass::Transient);
    }

    #[test]
    fn overload_message_on_500_is_transient() {
        assert_eq!(
            classify_status(500, "The model is overloaded. Please try again later."),
            FailureClass::Transient
        );
    }

    #[test]
    fn plain_500_is_terminal() {
        assert_eq!(classify_status(500, "internal error"), FailureClass::Other);
    }

    #[test]
    fn message_quota_signatures_rotate() {
        for msg in [
            "429 Resource has been exhausted (e.g. check quota).",
            "RESOURCE_EXHAUSTED",
            "You exceeded your current quota",
            "PERMISSION_DENIED: key revoked",
        ] {
            assert_eq!(classify_message(msg), FailureClass::QuotaOrAuth, "msg: {msg}");
        }
    }

    #[test]
    fn message_unavailable_is_transient() {
        assert_eq!(
            classify_message("503 The service is currently unavailable."),
            FailureClass::Transient
        );
    }

    #[test]
    fn message_unknown_is_terminal() {
        assert_eq!(
            classify_message("candidate was blocked due to SAFETY"),
            FailureClass::Other
        );
    }

    #[test]
    fn transport_errors_are_terminal() {
        assert_eq!(classify(&ClientError::Timeout), FailureClass::Other);
        assert_eq!(
            classify(&ClientError::Network("connection refused".into())),
            FailureClass::Other
        );
        assert_eq!(
            classify(&ClientError::Blocked("content_filter".into())),
            FailureClass::Other
        );
    }

    #[test]
    fn classify_delegates_on_variant() {
        let http = ClientError::Http {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(classify(&http), FailureClass::QuotaOrAuth);
        let provider = ClientError::Provider("model overloaded".into());
        assert_eq!(classify(&provider), FailureClass::Transient);
    }
}
