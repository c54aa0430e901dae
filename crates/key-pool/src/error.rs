//! Error types for dispatch operations

use llm_client::ClientError;

/// Shown to end users when every key is spent.
pub const EXHAUSTED_USER_MESSAGE: &str =
    "All API keys are exhausted or rate limited. Please try again later.";

/// Errors from pool construction and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential pool is empty")]
    EmptyPool,

    #[error("pool exhausted after {attempts} attempts: {last_error}")]
    PoolExhausted { attempts: u32, last_error: String },

    #[error(transparent)]
    Upstream(#[from] ClientError),
}

impl Error {
    /// Message suitable for showing to the person chatting.
    pub fn user_message(&self) -> String {
        match self {
            Error::PoolExhausted { .. } => EXHAUSTED_USER_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
