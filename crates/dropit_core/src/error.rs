/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Error categories. None of them is fatal to the process: each one aborts
//! the operation that raised it and resets the owning component.

use tokio_tungstenite::tungstenite;

use crate::negotiation::{NegotiationRole, NegotiationState};

pub use dropit_protocol::ProtocolViolation;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("connect {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("signaling connection is not open")]
    NotOpen,
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("signaling socket: {0}")]
    Socket(#[from] tungstenite::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("{op} is not valid in state {state:?}")]
    InvalidTransition {
        op: &'static str,
        state: NegotiationState,
    },
    #[error("{op} is not valid for the {role:?} role")]
    WrongRole {
        op: &'static str,
        role: NegotiationRole,
    },
    #[error("transport failed during {op}: {source:#}")]
    Transport {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("data channel opened before it was announced")]
    MissingChannel,
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{name} ended at {offset} of {size} bytes")]
    ShortRead { name: String, offset: u64, size: u64 },
    #[error("send {name}: {source:#}")]
    Send {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("encode {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("data channel '{label}' is not open")]
    ChannelClosed { label: String },
}
