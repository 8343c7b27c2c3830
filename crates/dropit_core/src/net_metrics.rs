/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
pub struct TransferMetrics {
    pub signaling_connected: AtomicBool,
    pub signaling_rx_bytes: AtomicU64,
    pub signaling_tx_bytes: AtomicU64,
    pub signaling_last_change_ms: AtomicU64,
    signaling_last_error: Mutex<Option<String>>,

    pub channel_rx_bytes: AtomicU64,
    pub channel_tx_bytes: AtomicU64,

    pub files_sent: AtomicU64,
    pub files_received: AtomicU64,
    pub files_failed: AtomicU64,
    pub protocol_violations: AtomicU64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub signaling_connected: bool,
    pub signaling_rx_bytes: u64,
    pub signaling_tx_bytes: u64,
    pub signaling_last_change_ms: u64,
    pub signaling_last_error: Option<String>,
    pub channel_rx_bytes: u64,
    pub channel_tx_bytes: u64,
    pub files_sent: u64,
    pub files_received: u64,
    pub files_failed: u64,
    pub protocol_violations: u64,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_signaling_connected(&self, v: bool) {
        self.signaling_connected.store(v, Ordering::Relaxed);
        self.signaling_last_change_ms.store(now_ms(), Ordering::Relaxed);
        if v {
            if let Ok(mut g) = self.signaling_last_error.lock() {
                *g = None;
            }
        }
    }

    pub fn set_signaling_error(&self, err: String) {
        self.set_signaling_connected(false);
        if let Ok(mut g) = self.signaling_last_error.lock() {
            *g = Some(err);
        }
    }

    pub fn signaling_rx_add(&self, n: u64) {
        self.signaling_rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn signaling_tx_add(&self, n: u64) {
        self.signaling_tx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn channel_rx_add(&self, n: u64) {
        self.channel_rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn channel_tx_add(&self, n: u64) {
        self.channel_tx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn file_sent(&self) {
        self.files_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_received(&self) {
        self.files_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            signaling_connected: self.signaling_connected.load(Ordering::Relaxed),
            signaling_rx_bytes: self.signaling_rx_bytes.load(Ordering::Relaxed),
            signaling_tx_bytes: self.signaling_tx_bytes.load(Ordering::Relaxed),
            signaling_last_change_ms: self.signaling_last_change_ms.load(Ordering::Relaxed),
            signaling_last_error: self
                .signaling_last_error
                .lock()
                .ok()
                .and_then(|g| g.clone()),
            channel_rx_bytes: self.channel_rx_bytes.load(Ordering::Relaxed),
            channel_tx_bytes: self.channel_tx_bytes.load(Ordering::Relaxed),
            files_sent: self.files_sent.load(Ordering::Relaxed),
            files_received: self.files_received.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_clears_last_error() {
        let m = TransferMetrics::new();
        m.set_signaling_error("refused".to_string());
        let s = m.snapshot();
        assert!(!s.signaling_connected);
        assert_eq!(s.signaling_last_error.as_deref(), Some("refused"));

        m.set_signaling_connected(true);
        let s = m.snapshot();
        assert!(s.signaling_connected);
        assert!(s.signaling_last_error.is_none());
    }
}
