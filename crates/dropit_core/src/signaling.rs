/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dropit_protocol::{IceCandidate, SessionDescription, SignalingEnvelope};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::SignalingError;
use crate::net_metrics::TransferMetrics;

#[derive(Debug)]
pub enum SignalingEvent {
    Opened,
    /// Our own join envelope reached the socket.
    Joined(String),
    /// The other room member announced itself.
    PeerJoined(String),
    RemoteOffer { room: String, sdp: SessionDescription },
    RemoteAnswer { room: String, sdp: SessionDescription },
    RemoteCandidate { room: String, candidate: IceCandidate },
    /// Non-fatal; the stream keeps going.
    Error(SignalingError),
    Closed,
}

impl From<SignalingEnvelope> for SignalingEvent {
    fn from(env: SignalingEnvelope) -> Self {
        match env {
            SignalingEnvelope::Join { room } => SignalingEvent::PeerJoined(room),
            SignalingEnvelope::Offer { room, sdp } => SignalingEvent::RemoteOffer { room, sdp },
            SignalingEnvelope::Answer { room, sdp } => SignalingEvent::RemoteAnswer { room, sdp },
            SignalingEnvelope::IceCandidate { room, candidate } => {
                SignalingEvent::RemoteCandidate { room, candidate }
            }
        }
    }
}

/// Outbound half of a relay connection.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), SignalingError>;
    /// Idempotent.
    async fn close(&self);
}

/// One WebSocket connection to the room relay.
///
/// Inbound envelopes and socket lifecycle changes arrive on the event receiver
/// returned by [`SignalingClient::connect`]; the stream ends with
/// [`SignalingEvent::Closed`]. There is no reconnect: callers open a new client.
pub struct SignalingClient {
    out_tx: mpsc::Sender<SignalingEnvelope>,
    open: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl SignalingClient {
    pub async fn connect(
        url: &str,
        ping_interval: Duration,
        metrics: Arc<TransferMetrics>,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>), SignalingError> {
        info!(%url, "connecting signaling relay");
        let (ws, _) = match tokio_tungstenite::connect_async(url).await {
            Ok(v) => v,
            Err(e) => {
                metrics.set_signaling_error(e.to_string());
                return Err(SignalingError::Connect {
                    url: url.to_string(),
                    source: e,
                });
            }
        };
        metrics.set_signaling_connected(true);

        let (out_tx, out_rx) = mpsc::channel::<SignalingEnvelope>(64);
        let (ev_tx, ev_rx) = mpsc::channel::<SignalingEvent>(128);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let open = Arc::new(AtomicBool::new(true));

        let _ = ev_tx.send(SignalingEvent::Opened).await;
        tokio::spawn(run_socket(
            ws,
            out_rx,
            ev_tx,
            shutdown_rx,
            open.clone(),
            ping_interval,
            metrics,
        ));

        Ok((
            Self {
                out_tx,
                open,
                shutdown: shutdown_tx,
            },
            ev_rx,
        ))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SignalSink for SignalingClient {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::NotOpen);
        }
        self.out_tx
            .send(envelope)
            .await
            .map_err(|_| SignalingError::NotOpen)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
    }
}

async fn run_socket(
    ws: Socket,
    mut out_rx: mpsc::Receiver<SignalingEnvelope>,
    ev_tx: mpsc::Sender<SignalingEvent>,
    mut shutdown: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
    ping_interval: Duration,
    metrics: Arc<TransferMetrics>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped client counts as a shutdown request.
                if changed.is_err() || *shutdown.borrow() {
                    let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = ws_tx.send(tungstenite::Message::Ping(Vec::new())).await {
                    metrics.set_signaling_error(e.to_string());
                    let _ = ev_tx.send(SignalingEvent::Error(e.into())).await;
                    break;
                }
            }
            out = out_rx.recv() => {
                let Some(env) = out else { break };
                let json = match env.to_json() {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(kind = env.kind(), "envelope not serializable: {e}");
                        continue;
                    }
                };
                debug!(kind = env.kind(), room = env.room(), "signal out");
                metrics.signaling_tx_add(json.len() as u64);
                if let Err(e) = ws_tx.send(tungstenite::Message::Text(json)).await {
                    metrics.set_signaling_error(e.to_string());
                    let _ = ev_tx.send(SignalingEvent::Error(e.into())).await;
                    break;
                }
                if let SignalingEnvelope::Join { room } = env {
                    let _ = ev_tx.send(SignalingEvent::Joined(room)).await;
                }
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        metrics.set_signaling_error(e.to_string());
                        let _ = ev_tx.send(SignalingEvent::Error(e.into())).await;
                        break;
                    }
                };
                let text = match msg {
                    tungstenite::Message::Text(t) => t,
                    tungstenite::Message::Ping(p) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => break,
                    _ => continue,
                };
                metrics.signaling_rx_add(text.len() as u64);
                match SignalingEnvelope::from_json(&text) {
                    Ok(env) => {
                        debug!(kind = env.kind(), room = env.room(), "signal in");
                        let _ = ev_tx.send(SignalingEvent::from(env)).await;
                    }
                    Err(e) => {
                        warn!("malformed signaling envelope: {e}");
                        let _ = ev_tx.send(SignalingEvent::Error(e.into())).await;
                    }
                }
            }
        }
    }

    open.store(false, Ordering::Release);
    metrics.set_signaling_connected(false);
    let _ = ev_tx.send(SignalingEvent::Closed).await;
    info!("signaling connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Text(t))) => return t,
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn client_exchanges_envelopes_with_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let join = next_text(&mut ws).await;
            ws.send(tungstenite::Message::Text(
                r#"{"sdp":{"type":"offer","sdp":"v=0"},"roomId":"r1"}"#.to_string(),
            ))
            .await
            .unwrap();
            ws.send(tungstenite::Message::Text("{\"bogus\":1}".to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            join
        });

        let metrics = Arc::new(TransferMetrics::new());
        let (client, mut events) = SignalingClient::connect(
            &format!("ws://{addr}"),
            Duration::from_secs(30),
            metrics.clone(),
        )
        .await
        .unwrap();
        assert!(matches!(events.recv().await, Some(SignalingEvent::Opened)));

        client
            .send(SignalingEnvelope::Join {
                room: "r1".to_string(),
            })
            .await
            .unwrap();

        let mut saw_joined = false;
        let mut saw_offer = false;
        let mut saw_error = false;
        while let Some(ev) = events.recv().await {
            match ev {
                SignalingEvent::Joined(room) => {
                    assert_eq!(room, "r1");
                    saw_joined = true;
                }
                SignalingEvent::RemoteOffer { room, sdp } => {
                    assert_eq!(room, "r1");
                    assert_eq!(sdp, SessionDescription::offer("v=0"));
                    saw_offer = true;
                }
                SignalingEvent::Error(SignalingError::Malformed(_)) => saw_error = true,
                SignalingEvent::Closed => break,
                _ => {}
            }
        }
        assert!(saw_joined && saw_offer && saw_error);
        assert_eq!(server.await.unwrap(), r#"{"join":"r1"}"#);

        assert!(!client.is_open());
        assert!(matches!(
            client
                .send(SignalingEnvelope::Join {
                    room: "r1".to_string()
                })
                .await,
            Err(SignalingError::NotOpen)
        ));
        client.close().await;
        client.close().await;
        assert!(!metrics.snapshot().signaling_connected);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let metrics = Arc::new(TransferMetrics::new());
        let err = SignalingClient::connect(&format!("ws://{addr}"), Duration::from_secs(5), metrics.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SignalingError::Connect { .. }));
        assert!(metrics.snapshot().signaling_last_error.is_some());
    }

    #[test]
    fn join_from_peer_maps_to_peer_joined() {
        let ev = SignalingEvent::from(SignalingEnvelope::Join {
            room: "r".to_string(),
        });
        assert!(matches!(ev, SignalingEvent::PeerJoined(r) if r == "r"));
    }
}
