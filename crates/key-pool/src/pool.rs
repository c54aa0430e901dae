//! Credential pool and rotation cursor
//!
//! The pool is an ordered, immutable list of API keys loaded once at startup
//! and shared read-only between sessions. Each session owns its own `Cursor`
//! so sessions never step on each other's rotation.

use common::ApiKey;
use tracing::info;

use crate::error::{Error, Result};

/// Ordered, non-empty set of API keys.
#[derive(Debug)]
pub struct CredentialPool {
    keys: Vec<ApiKey>,
}

impl CredentialPool {
    /// Build a pool. Fails with `EmptyPool` when `keys` is empty.
    pub fn new(keys: Vec<ApiKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::EmptyPool);
        }
        info!(keys = keys.len(), "credential pool initialized");
        Ok(Self { keys })
    }

    /// Number of keys (always >= 1).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `slot`. The cursor guarantees `slot < len()`.
    pub fn key(&self, slot: usize) -> &ApiKey {
        &self.keys[slot % self.keys.len()]
    }

    /// Start a cursor at slot 0.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            position: 0,
            len: self.keys.len(),
        }
    }
}

/// Index into a pool that wraps modulo the pool size.
///
/// `advance` is the only mutator; the position always indexes a valid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    position: usize,
    len: usize,
}

impl Cursor {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to the next slot, wrapping at the end of the pool.
    pub fn advance(&mut self) -> usize {
        self.position = (self.position + 1) % self.len;
        self.position
    }
}
