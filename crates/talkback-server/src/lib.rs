//! Talkback server library logic.
//!
//! Browsers upload a voice note, the transcript travels to a remote
//! operator through the queue relay, and the operator's eventual reply is
//! pushed back over the caller's WebSocket.

pub mod api;
pub mod api_upload;
pub mod api_ws;
pub mod auth;
pub mod background;
pub mod config;
pub mod delivery;
pub mod hub;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::Config;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use talkback_db::DbPool;
use talkback_relay::{Correlator, DeliveryMode, QueueRelay, QueueStore};
use talkback_voice::{SttService, TtsService};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers and background
/// tasks.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live push sessions.
    pub hub: hub::Hub,
    /// Reply matching over the relay inbox.
    pub correlator: Correlator,
    pub stt: Arc<SttService>,
    pub tts: Arc<TtsService>,
    /// Bot identity whose inbox carries replies.
    pub recipient: String,
    pub delivery: DeliveryMode,
    pub reply_timeout: Duration,
    /// Root of the `uploads/` and `replies/` audio directories.
    pub audio_dir: PathBuf,
    /// Outbound frames buffered per WebSocket connection.
    pub connection_capacity: usize,
    pub jwt_secret: String,
    /// Cancelled on shutdown; stops waiters, the listener and open sockets.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the state from configuration. Spawns the hub task, so it must
    /// run inside a tokio runtime.
    pub fn new(
        config: &Config,
        pool: DbPool,
        store: Arc<dyn QueueStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let relay_config = &config.relay;
        let relay = QueueRelay::new(
            store,
            relay_config.outbound_queue.clone(),
            relay_config.inbox_prefix.clone(),
        );
        let correlator = Correlator::new(
            relay,
            relay_config.channel.clone(),
            relay_config.envelope,
            relay_config.poll_interval(),
        );

        Self {
            pool,
            hub: hub::Hub::new(),
            correlator,
            stt: Arc::new(SttService::from_config(&config.voice)),
            tts: Arc::new(TtsService::from_config(&config.voice)),
            recipient: relay_config.recipient.clone(),
            delivery: relay_config.delivery,
            reply_timeout: relay_config.reply_timeout(),
            audio_dir: config.voice.audio_dir.clone(),
            connection_capacity: config.hub.connection_capacity,
            jwt_secret: config.auth.jwt_secret.clone(),
            shutdown,
        }
    }

    /// Synthesized replies; the only directory served at `/api/audio`.
    pub fn reply_audio_dir(&self) -> PathBuf {
        self.audio_dir.join("replies")
    }

    /// Recordings awaiting transcription. Never served.
    pub fn upload_dir(&self) -> PathBuf {
        self.audio_dir.join("uploads")
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/upload", post(api_upload::upload_handler))
        .route("/api/reply", get(api_upload::reply_status_handler))
        .route("/api/history", get(api_upload::history_handler))
        .layer(DefaultBodyLimit::max(api_upload::MAX_UPLOAD_SIZE + 64 * 1024))
        .nest_service("/api/audio", ServeDir::new(state.reply_audio_dir()))
        .layer(axum::middleware::from_fn(auth::auth_middleware));

    tracing::info!(
        path = %state.reply_audio_dir().display(),
        "serving reply audio at /api/audio"
    );

    Router::new()
        .route("/health", get(health))
        .route("/api/ws", get(api_ws::ws_handler))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
