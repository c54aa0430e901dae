//! Rotating-credential request dispatch
//!
//! Holds a fixed pool of provider API keys and a per-session dispatcher that
//! walks the pool when keys run out of quota. Each dispatch call:
//! 1. Sends the request with the key at the session's cursor
//! 2. Quota/auth rejection → advance the cursor, retry immediately
//! 3. Service overloaded → wait, retry with the same key
//! 4. Anything else → return the error unchanged
//! 5. Budget spent → `PoolExhausted`
//!
//! Rotation is sticky: the next call starts from wherever the last one left
//! the cursor.

pub mod dispatcher;
pub mod error;
pub mod pool;

pub use dispatcher::{DispatchPolicy, Dispatcher};
pub use error::{Error, Result};
pub use pool::{CredentialPool, Cursor};
