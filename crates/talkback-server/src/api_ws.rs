//! WebSocket transport for push sessions.
//!
//! Each socket gets two pumps: a writer draining the connection's outbound
//! frames to the wire and a reader watching for the peer going away. The
//! hub only ever talks to the writer's channel, so a slow peer stalls
//! nothing but its own session.

use crate::auth::{verify_token, SessionUser};
use crate::hub::{Connection, ConnectionHandle, ConnectionState};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub token: Option<String>,
}

/// Handler for `GET /api/ws?token=`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        tracing::warn!(remote_addr = %addr, "websocket connect missing token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user = match verify_token(&token, &state.jwt_secret) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(remote_addr = %addr, "websocket token verification failed: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    tracing::info!(
        user_id = user.user_id,
        username = %user.username,
        remote_addr = %addr,
        "websocket auth success"
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: SessionUser) {
    let (conn, handle) = Connection::new(user.user_id, &user.username, state.connection_capacity);
    let ConnectionHandle {
        id: conn_id,
        mut frames,
        state: conn_state,
    } = handle;

    state.hub.register(conn);

    let (mut sender, mut receiver) = socket.split();
    let session = state.shutdown.child_token();

    // Writer: ends when the hub drops the connection, the peer stops
    // accepting writes, or the session is cancelled.
    let writer_session = session.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_session.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        writer_session.cancel();
    });

    // Reader: clients send nothing meaningful; this only notices closure.
    loop {
        tokio::select! {
            () = session.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(user_id = user.user_id, "websocket read error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    session.cancel();
    state.hub.unregister(user.user_id, conn_id);
    if let Err(e) = send_task.await {
        tracing::debug!(user_id = user.user_id, "websocket writer task failed: {}", e);
    }

    if *conn_state.borrow() == ConnectionState::Evicted {
        tracing::info!(user_id = user.user_id, conn_id = %conn_id, "websocket closed after eviction");
    } else {
        tracing::info!(user_id = user.user_id, conn_id = %conn_id, "websocket closed");
    }
}
