//! Rotating-credential request dispatcher
//!
//! Per-call state machine:
//!
//! ```text
//! TRY(pool[cursor]) --success-------> return response (cursor unchanged)
//! TRY --quota/auth--> cursor += 1 (mod N) --> TRY     while rotations < N
//! TRY --transient---> sleep(delay)       --> TRY     while retries < max_transient_retries
//! TRY --other-------> return Upstream(err)
//! budget spent ------> return PoolExhausted
//! ```
//!
//! Each session owns one `Dispatcher`; the cursor is a plain field mutated
//! through `&mut self`, so there is no internal locking.

use std::sync::Arc;
use std::time::Duration;

use llm_client::{Delivery, FailureClass, LlmClient, LlmResponse, Payload, Turn};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::pool::{CredentialPool, Cursor};

/// Retry limits for same-credential retries.
///
/// Rotation retries are always bounded by the pool size.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Retries allowed after transient failures within one dispatch call
    pub max_transient_retries: u32,
    /// Pause before each same-credential retry
    pub transient_delay: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            transient_delay: Duration::from_secs(2),
        }
    }
}

/// Session-scoped dispatcher: shared pool and client, private cursor.
pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    client: Arc<dyn LlmClient>,
    cursor: Cursor,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<CredentialPool>,
        client: Arc<dyn LlmClient>,
        policy: DispatchPolicy,
    ) -> Self {
        let cursor = pool.cursor();
        Self {
            pool,
            client,
            cursor,
            policy,
        }
    }

    /// Slot the next attempt will use.
    pub fn cursor(&self) -> usize {
        self.cursor.position()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Deliver one request, rotating and retrying as failures dictate.
    ///
    /// Quota/auth failures rotate until every key has failed once; the
    /// `pool_size`-th yields `PoolExhausted`. `max_transient_retries`
    /// transient failures are retried and the next one yields
    /// `PoolExhausted`. Other failures return immediately as `Upstream`.
    #[instrument(skip_all, fields(provider = self.client.id(), turns = history.len(), delivery = ?delivery))]
    pub async fn dispatch(
        &mut self,
        history: &[Turn],
        payload: &Payload,
        delivery: Delivery,
    ) -> Result<LlmResponse> {
        let pool_size = self.pool.len();
        let mut attempts = 0u32;
        let mut rotations = 0usize;
        let mut transient_retries = 0u32;

        loop {
            let slot = self.cursor.position();
            attempts += 1;

            let err = match self
                .client
                .send(self.pool.key(slot), history, payload, delivery)
                .await
            {
                Ok(response) => {
                    metrics::counter!("dispatch_attempts_total", "outcome" => "success")
                        .increment(1);
                    debug!(slot, attempts, "dispatch succeeded");
                    return Ok(response);
                }
                Err(e) => e,
            };

            let class = self.client.classify_error(&err);
            metrics::counter!("dispatch_attempts_total", "outcome" => class.label()).increment(1);

            match class {
                FailureClass::QuotaOrAuth => {
                    rotations += 1;
                    let next_slot = self.cursor.advance();
                    metrics::counter!("credential_rotations_total").increment(1);
                    if rotations >= pool_size {
                        warn!(slot, attempts, error = %err, "every credential rejected, pool exhausted");
                        return Err(exhausted(attempts, &err));
                    }
                    info!(slot, next_slot, error = %err, "credential rejected, rotating");
                }
                FailureClass::Transient => {
                    if transient_retries >= self.policy.max_transient_retries {
                        warn!(slot, attempts, error = %err, "service still unavailable, giving up");
                        return Err(exhausted(attempts, &err));
                    }
                    transient_retries += 1;
                    metrics::counter!("transient_retries_total").increment(1);
                    warn!(
                        slot,
                        retry = transient_retries,
                        delay_ms = self.policy.transient_delay.as_millis() as u64,
                        error = %err,
                        "service unavailable, retrying same credential"
                    );
                    tokio::time::sleep(self.policy.transient_delay).await;
                }
                FailureClass::Other => {
                    warn!(slot, error = %err, "non-retryable provider error");
                    return Err(Error::Upstream(err));
                }
            }
        }
    }
}

fn exhausted(attempts: u32, last_error: &llm_client::ClientError) -> Error {
    metrics::counter!("dispatch_exhausted_total").increment(1);
    Error::PoolExhausted {
        attempts,
        last_error: last_error.to_string(),
    }
}
