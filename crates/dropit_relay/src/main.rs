/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Room relay: forwards signaling envelopes between the two members of a room.
//! File data never passes through here.

mod rooms;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::get,
    Router,
};
use dropit_protocol::SignalingEnvelope;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn};

use rooms::{JoinOutcome, MemberId, Rooms};

#[derive(Clone, Debug)]
struct RelayConfig {
    bind: SocketAddr,
    max_message_bytes: usize,
}

fn load_config() -> Result<RelayConfig> {
    let bind = std::env::var("DROPIT_RELAY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let bind: SocketAddr = bind
        .parse()
        .with_context(|| format!("DROPIT_RELAY_BIND invalid: {bind}"))?;
    let max_message_bytes = std::env::var("DROPIT_RELAY_MAX_MESSAGE_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(64 * 1024)
        .clamp(1024, 1024 * 1024);
    Ok(RelayConfig {
        bind,
        max_message_bytes,
    })
}

type Outbox = mpsc::Sender<String>;

#[derive(Clone)]
struct AppState {
    cfg: RelayConfig,
    rooms: Arc<Mutex<Rooms<Outbox>>>,
    next_member: Arc<AtomicU64>,
}

impl AppState {
    fn new(cfg: RelayConfig) -> Self {
        Self {
            cfg,
            rooms: Arc::new(Mutex::new(Rooms::new())),
            next_member: Arc::new(AtomicU64::new(1)),
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(signal_ws))
        .route("/healthz", get(healthz))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                info_span!("http", method = %req.method(), uri = %req.uri())
            }),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = load_config()?;
    let addr = cfg.bind;
    let app = router(AppState::new(cfg));

    info!("dropit_relay listening on ws://{addr}/ws");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("serve")?;
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> String {
    let rooms = state.rooms.lock().await.len();
    format!("ok rooms={rooms}")
}

async fn signal_ws(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let max = state.cfg.max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_member(state, peer, socket))
}

async fn handle_member(state: AppState, peer: SocketAddr, socket: WebSocket) {
    let member: MemberId = state.next_member.fetch_add(1, Ordering::Relaxed);
    info!(member, %peer, "member connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let cancel = CancellationToken::new();

    let cancel_writer = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_writer.cancelled() => break,
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            // axum answers pings itself.
            _ => continue,
        };
        let env = match SignalingEnvelope::from_json(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(member, "malformed envelope dropped: {e}");
                continue;
            }
        };
        route_envelope(&state, member, &tx, env, text).await;
    }

    cancel.cancel();
    let _ = writer.await;
    state.rooms.lock().await.leave(member);
    info!(member, %peer, "member disconnected");
}

/// Join registers the member (and tells the peer, if any); everything else
/// goes to the other member of the envelope's room.
async fn route_envelope(state: &AppState, member: MemberId, own: &Outbox, env: SignalingEnvelope, text: String) {
    let target = {
        let mut rooms = state.rooms.lock().await;
        match &env {
            SignalingEnvelope::Join { room } => match rooms.join(room, member, own.clone()) {
                JoinOutcome::Joined { peer_present } => {
                    info!(member, %room, peer_present, "joined room");
                    if peer_present {
                        rooms.peer_of(room, member)
                    } else {
                        None
                    }
                }
                JoinOutcome::Full => {
                    warn!(member, %room, "room full, join refused");
                    None
                }
            },
            other => {
                let peer = rooms.peer_of(other.room(), member);
                if peer.is_none() {
                    debug!(member, kind = other.kind(), room = other.room(), "no peer to forward to");
                }
                peer
            }
        }
    };

    if let Some(peer) = target {
        if peer.send(text).await.is_err() {
            debug!(member, kind = env.kind(), "peer went away");
        }
    }
}
