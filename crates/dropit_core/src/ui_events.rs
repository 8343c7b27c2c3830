/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

use crate::negotiation::NegotiationState;
use crate::receiver::ReceivedFile;

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEventKind {
    SignalingConnected,
    RoomJoined { room: String },
    PeerJoined,
    NegotiationState { state: NegotiationState },
    ConnectionEstablished,
    FileReceiveStarted { name: String, size: u64 },
    TransferProgress {
        file_name: String,
        bytes: u64,
        total: u64,
        direction: Direction,
    },
    FileSent { name: String, size: u64 },
    FileReceived { file: ReceivedFile },
    QueueFinished { sent: usize, failed: usize },
    Error { message: String },
    Closed,
}

#[derive(Clone, Debug, Serialize)]
pub struct UiEvent {
    pub ts_ms: u64,
    #[serde(flatten)]
    pub kind: UiEventKind,
}

impl UiEvent {
    pub fn new(kind: UiEventKind) -> Self {
        Self {
            ts_ms: now_ms_u64(),
            kind,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::new(UiEventKind::Error {
            message: message.to_string(),
        })
    }
}

pub type UiEventTx = tokio::sync::mpsc::UnboundedSender<UiEvent>;

/// Best-effort publish: a UI that stopped listening must not stall transfers.
pub fn emit(tx: &UiEventTx, kind: UiEventKind) {
    let _ = tx.send(UiEvent::new(kind));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_flat_with_kind_tag() {
        let ev = UiEvent::new(UiEventKind::TransferProgress {
            file_name: "a.bin".to_string(),
            bytes: 10,
            total: 20,
            direction: Direction::Outgoing,
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "transfer_progress");
        assert_eq!(v["file_name"], "a.bin");
        assert_eq!(v["direction"], "outgoing");
        assert!(v["ts_ms"].as_u64().unwrap() > 0);
    }

    #[test]
    fn emit_ignores_dropped_listener() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        emit(&tx, UiEventKind::Closed);
    }
}
