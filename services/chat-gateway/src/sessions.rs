//! Chat sessions
//!
//! Each session owns a `Dispatcher`, so its credential cursor is private and
//! rotation in one conversation never moves another conversation's cursor.
//! The pool and the provider client are shared read-only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use key_pool::{CredentialPool, DispatchPolicy, Dispatcher};
use llm_client::{Delivery, LlmClient, LlmResponse, Payload, Turn};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ApiError;

/// Shared handle. Holding the lock means owning the session's single in-flight request.
pub type SessionHandle = Arc<Mutex<Session>>;

pub struct Session {
    id: String,
    dispatcher: Dispatcher,
    history: Vec<Turn>,
    last_active: Instant,
}

impl Session {
    fn new(id: String, dispatcher: Dispatcher, greeting: &str) -> Self {
        Self {
            id,
            dispatcher,
            history: vec![Turn::assistant(greeting)],
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Pool slot the next request will start from.
    pub fn credential_slot(&self) -> usize {
        self.dispatcher.cursor()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Send `payload` with the transcript so far. History is not modified;
    /// call `record_exchange` once the full answer is known.
    pub async fn dispatch(
        &mut self,
        payload: &Payload,
        delivery: Delivery,
    ) -> key_pool::Result<LlmResponse> {
        self.touch();
        self.dispatcher
            .dispatch(&self.history, payload, delivery)
            .await
    }

    /// Append the user's text and the assistant's answer.
    pub fn record_exchange(&mut self, payload: &Payload, reply: impl Into<String>) {
        self.history.push(payload.to_history_turn());
        self.history.push(Turn::assistant(reply));
        self.touch();
    }
}

/// Live sessions plus everything needed to open new ones.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    pool: Arc<CredentialPool>,
    client: Arc<dyn LlmClient>,
    policy: DispatchPolicy,
    greeting: String,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(
        pool: Arc<CredentialPool>,
        client: Arc<dyn LlmClient>,
        policy: DispatchPolicy,
        greeting: impl Into<String>,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pool,
            client,
            policy,
            greeting: greeting.into(),
            max_sessions,
        }
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn provider(&self) -> &str {
        self.client.id()
    }

    /// Open a session. Fails once `max_sessions` are live.
    pub async fn create(&self) -> Result<String, ApiError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(ApiError::TooManySessions(sessions.len()));
        }

        let id = uuid::Uuid::new_v4().as_simple().to_string();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.client),
            self.policy.clone(),
        );
        let session = Session::new(id.clone(), dispatcher, &self.greeting);
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        crate::metrics::set_sessions_active(sessions.len());

        info!(session_id = %id, active = sessions.len(), "session created");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop a session. Returns false when it did not exist.
    pub async fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id).is_some();
        if removed {
            crate::metrics::set_sessions_active(sessions.len());
            info!(session_id = %id, "session closed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict sessions idle for at least `ttl`. A session whose lock is held
    /// is mid-request and therefore not idle.
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, handle| match handle.try_lock() {
            Ok(session) if session.idle_for() >= ttl => {
                debug!(session_id = %id, "evicting idle session");
                false
            }
            _ => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            crate::metrics::set_sessions_active(sessions.len());
            info!(evicted, active = sessions.len(), "idle sessions swept");
        }
        evicted
    }
}

/// Spawn a background task that sweeps idle sessions every `interval`.
pub fn spawn_sweep_task(
    store: Arc<SessionStore>,
    interval: Duration,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            store.sweep_idle(ttl).await;
        }
    })
}
