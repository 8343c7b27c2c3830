/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Seam between the protocol engine and the NAT-traversal stack.
//!
//! Implementations report asynchronous happenings (gathered candidates, the
//! remote data channel, open/close, inbound messages) as [`TransportEvent`]s on
//! a channel handed out at construction, so that all of them are processed by
//! the session's single event loop.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dropit_protocol::{Frame, IceCandidate, SessionDescription};

/// Label of the file transfer channel.
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    /// Answering side only: the remote peer created a data channel.
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    Message(Frame),
    ChannelClosed,
    ChannelError(String),
    PeerState(PeerState),
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::DataChannel(dc) => f.debug_tuple("DataChannel").field(&dc.label()).finish(),
            Self::ChannelOpen => f.write_str("ChannelOpen"),
            Self::Message(m) => f.debug_tuple("Message").field(&m.len()).finish(),
            Self::ChannelClosed => f.write_str("ChannelClosed"),
            Self::ChannelError(e) => f.debug_tuple("ChannelError").field(e).finish(),
            Self::PeerState(s) => f.debug_tuple("PeerState").field(s).finish(),
        }
    }
}

/// One peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Ordered, reliable channel created by the offering side.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn is_open(&self) -> bool;
    /// Returns the number of bytes handed to the transport.
    async fn send_frame(&self, frame: &Frame) -> Result<usize>;
    /// Bytes queued but not yet sent, if the transport exposes it.
    async fn buffered_amount(&self) -> Option<usize>;
    async fn close(&self) -> Result<()>;
}
