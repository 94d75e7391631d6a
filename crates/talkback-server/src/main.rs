//! Talkback server binary.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the queue relay connection and graceful shutdown on
//! SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use talkback_relay::{DeliveryMode, RedisStore};
use talkback_server::background::{start_inbox_listener, ListenerTiming};
use talkback_server::{app, config, AppState};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TALKBACK_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    config.validate().expect("invalid configuration");

    let pool = talkback_db::create_pool(
        &config.database.path,
        talkback_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            talkback_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let store = RedisStore::connect(&config.relay.redis_url)
        .await
        .expect("failed to connect to the queue store; check relay.redis_url");
    tracing::info!(
        recipient = %config.relay.recipient,
        channel = %config.relay.channel,
        delivery = ?config.relay.delivery,
        envelope = ?config.relay.envelope,
        "queue relay connected"
    );

    let shutdown = CancellationToken::new();
    let state = AppState::new(&config, pool, Arc::new(store), shutdown.clone());

    let listener_task = if config.relay.delivery == DeliveryMode::Listener {
        Some(start_inbox_listener(
            Arc::new(state.clone()),
            ListenerTiming {
                interval: config.relay.listener_interval(),
                backoff: config.relay.listener_backoff(),
            },
        ))
    } else {
        None
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting talkback server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    let signal_token = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        signal_token.cancel();
    })
    .await
    .expect("server error");

    shutdown.cancel();
    if let Some(task) = listener_task {
        let _ = task.await;
    }

    tracing::info!("talkback server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
