//! keyring-chat
//!
//! Chat gateway in front of an OpenAI-compatible LLM provider that:
//! 1. Loads an ordered pool of API keys at startup
//! 2. Keeps one conversation per session, each with its own key cursor
//! 3. Rotates to the next key on quota/auth failures and waits out overloads
//! 4. Serves answers as JSON or as a streamed text body

mod api;
mod config;
mod error;
mod metrics;
mod sessions;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use key_pool::CredentialPool;
use llm_client::{LlmClient, OpenAiCompatClient};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::api::{ChatRequest, ChatState};
use crate::config::Config;
use crate::error::ApiError;
use crate::sessions::SessionStore;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    chat: ChatState,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently handled requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/sessions", post(create_session_handler))
        .route(
            "/v1/sessions/{id}",
            get(transcript_handler).delete(delete_session_handler),
        )
        .route("/v1/sessions/{id}/messages", post(message_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting keyring-chat");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        keys = config.api_keys.len(),
        max_sessions = config.sessions.max_sessions,
        "configuration loaded"
    );

    let client: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(
        reqwest::Client::new(),
        config.llm.base_url.clone(),
        config.chat_settings(),
        Duration::from_secs(config.server.timeout_secs),
    ));
    let pool = CredentialPool::new(std::mem::take(&mut config.api_keys))
        .context("failed to build credential pool")?;

    let store = Arc::new(SessionStore::new(
        Arc::new(pool),
        client,
        config.dispatch_policy(),
        config.sessions.greeting.clone(),
        config.sessions.max_sessions,
    ));
    let _sweeper = sessions::spawn_sweep_task(
        Arc::clone(&store),
        Duration::from_secs(config.sessions.sweep_interval_secs),
        Duration::from_secs(config.sessions.idle_ttl_secs),
    );

    let app_state = AppState {
        chat: ChatState {
            sessions: store,
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        },
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, pool size, live sessions, uptime, request counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = &state.chat.sessions;
    let body = serde_json::json!({
        "status": "healthy",
        "provider": sessions.provider(),
        "pool_size": sessions.pool_size(),
        "sessions_active": sessions.len().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.chat.requests_total.load(Ordering::Relaxed),
        "errors_total": state.chat.errors_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn create_session_handler(State(state): State<AppState>) -> Response {
    api::create_session(&state.chat, new_request_id()).await
}

async fn transcript_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    api::transcript(&state.chat, id, new_request_id()).await
}

async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    api::delete_session(&state.chat, id, new_request_id()).await
}

/// Malformed JSON bodies get the same error envelope as every other failure.
async fn message_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<axum::Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = body
        .map(|axum::Json(request)| request)
        .map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()));
    api::post_message(&state.chat, id, request, new_request_id()).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
