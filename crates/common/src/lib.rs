//! Shared types for keyring-chat

mod api_key;
mod error;

pub use api_key::ApiKey;
pub use error::{Error, Result};
