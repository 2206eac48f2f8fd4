// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The axum WebSocket server in front of the registry.
//!
//! Sockets are screened at upgrade time (origin/peer checks), then each
//! connection gets a read loop that forwards frames to the registry and
//! a write task that drains the registry's per-connection channel.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use aibro_core::AibroError;

use crate::registry::Command;

/// Server-side settings the broker needs at bind time.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Origins accepted from public peers, matched verbatim.
    pub allowed_origins: Vec<String>,
    /// Skip origin screening entirely.
    pub dev_mode: bool,
    /// Directory of published speech artifacts, served read-only.
    pub audio_dir: PathBuf,
}

#[derive(Clone)]
struct BrokerState {
    cmd_tx: mpsc::Sender<Command>,
    allowed_origins: std::sync::Arc<Vec<String>>,
    dev_mode: bool,
}

/// Bind and serve `/ws` plus the public audio directory.
pub async fn start_server(
    config: &BrokerConfig,
    cmd_tx: mpsc::Sender<Command>,
) -> Result<(), AibroError> {
    let state = BrokerState {
        cmd_tx,
        allowed_origins: std::sync::Arc::new(config.allowed_origins.clone()),
        dev_mode: config.dev_mode,
    };

    let audio_route = format!(
        "/{}",
        config
            .audio_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tts_cache".to_string())
    );
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .nest_service(&audio_route, ServeDir::new(&config.audio_dir))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AibroError::Channel {
            message: format!("failed to bind broker to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("broker listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| AibroError::Channel {
        message: format!("broker server error: {e}"),
        source: Some(Box::new(e)),
    })?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<BrokerState>,
) -> Response {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if !crate::origin::upgrade_allowed(
        origin.as_deref(),
        peer.ip(),
        &state.allowed_origins,
        state.dev_mode,
    ) {
        tracing::warn!(peer = %peer, origin = origin.as_deref().unwrap_or(""), "rejected upgrade");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection: register it, pump both directions, clean up.
async fn handle_socket(socket: WebSocket, state: BrokerState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn_id = uuid::Uuid::new_v4().to_string();

    let (tx, mut rx) = mpsc::channel::<String>(64);
    if state
        .cmd_tx
        .send(Command::Connected {
            conn_id: conn_id.clone(),
            sender: tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let sender_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = ws_receiver.next().await {
        match frame {
            Message::Text(text) => {
                if state
                    .cmd_tx
                    .send(Command::Inbound {
                        conn_id: conn_id.clone(),
                        raw: text.to_string(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {} // Binary and ping frames are ignored.
        }
    }

    let _ = state
        .cmd_tx
        .send(Command::Disconnected {
            conn_id: conn_id.clone(),
        })
        .await;
    sender_task.abort();
    tracing::debug!(conn_id, "socket closed");
}
