/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Offer/answer state machine.
//!
//! ```text
//! offering:  Idle -> OfferCreated -> AwaitingAnswer -> Connected
//! answering: Idle -> OfferReceived -> AnswerCreated -> Connected
//! any state -> Closed
//! ```
//!
//! Remote ICE candidates may arrive at any point; those that arrive before
//! the remote description is set are held back and applied right after it.

use std::sync::Arc;

use dropit_protocol::{IceCandidate, SessionDescription, SignalingEnvelope};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::room::RoomId;
use crate::signaling::SignalSink;
use crate::transport::{DataChannel, PeerTransport, DATA_CHANNEL_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NegotiationRole {
    Offering,
    Answering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    Idle,
    OfferCreated,
    AwaitingAnswer,
    OfferReceived,
    AnswerCreated,
    Connected,
    Closed,
}

pub struct Negotiator<T: PeerTransport> {
    role: NegotiationRole,
    room: RoomId,
    state: NegotiationState,
    transport: T,
    signal: Arc<dyn SignalSink>,
    channel: Option<Arc<dyn DataChannel>>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    transitions: Vec<NegotiationState>,
}

impl<T: PeerTransport> Negotiator<T> {
    pub fn new(role: NegotiationRole, room: RoomId, transport: T, signal: Arc<dyn SignalSink>) -> Self {
        Self {
            role,
            room,
            state: NegotiationState::Idle,
            transport,
            signal,
            channel: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == NegotiationState::Connected
    }

    /// Shared handle to the data channel once it exists.
    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.clone()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// States entered since the last call, oldest first.
    pub fn take_transitions(&mut self) -> Vec<NegotiationState> {
        std::mem::take(&mut self.transitions)
    }

    fn set_state(&mut self, next: NegotiationState) {
        if self.state == next {
            return;
        }
        debug!(from = ?self.state, to = ?next, room = %self.room, "negotiation transition");
        self.state = next;
        self.transitions.push(next);
    }

    fn require(&self, op: &'static str, role: NegotiationRole, state: NegotiationState) -> Result<(), NegotiationError> {
        if self.role != role {
            return Err(NegotiationError::WrongRole { op, role: self.role });
        }
        if self.state != state {
            return Err(NegotiationError::InvalidTransition { op, state: self.state });
        }
        Ok(())
    }

    /// Tears the attempt down and hands the error back for reporting.
    async fn abort(&mut self, err: NegotiationError) -> NegotiationError {
        warn!(room = %self.room, state = ?self.state, "negotiation aborted: {err}");
        self.close().await;
        err
    }

    async fn emit(&mut self, env: SignalingEnvelope) -> Result<(), NegotiationError> {
        if let Err(e) = self.signal.send(env).await {
            return Err(self.abort(e.into()).await);
        }
        Ok(())
    }

    /// Offering side: create the data channel and send an offer.
    pub async fn initiate(&mut self) -> Result<(), NegotiationError> {
        self.require("initiate", NegotiationRole::Offering, NegotiationState::Idle)?;

        let channel = match self.transport.create_data_channel(DATA_CHANNEL_LABEL).await {
            Ok(c) => c,
            Err(e) => {
                let err = NegotiationError::Transport { op: "create data channel", source: e };
                return Err(self.abort(err).await);
            }
        };
        self.channel = Some(channel);

        let offer = match self.transport.create_offer().await {
            Ok(o) => o,
            Err(e) => {
                let err = NegotiationError::Transport { op: "create offer", source: e };
                return Err(self.abort(err).await);
            }
        };
        if let Err(e) = self.transport.set_local_description(offer.clone()).await {
            let err = NegotiationError::Transport { op: "set local description", source: e };
            return Err(self.abort(err).await);
        }
        self.set_state(NegotiationState::OfferCreated);

        self.emit(SignalingEnvelope::description(self.room.as_str(), offer)).await?;
        self.set_state(NegotiationState::AwaitingAnswer);
        info!(room = %self.room, "offer sent");
        Ok(())
    }

    /// Answering side: accept the remote offer and reply with an answer.
    pub async fn on_remote_offer(&mut self, sdp: SessionDescription) -> Result<(), NegotiationError> {
        self.require("remote offer", NegotiationRole::Answering, NegotiationState::Idle)?;
        self.set_state(NegotiationState::OfferReceived);

        self.apply_remote_description(sdp).await?;

        let answer = match self.transport.create_answer().await {
            Ok(a) => a,
            Err(e) => {
                let err = NegotiationError::Transport { op: "create answer", source: e };
                return Err(self.abort(err).await);
            }
        };
        if let Err(e) = self.transport.set_local_description(answer.clone()).await {
            let err = NegotiationError::Transport { op: "set local description", source: e };
            return Err(self.abort(err).await);
        }

        self.emit(SignalingEnvelope::description(self.room.as_str(), answer)).await?;
        self.set_state(NegotiationState::AnswerCreated);
        info!(room = %self.room, "answer sent");
        Ok(())
    }

    /// Offering side: the peer answered. `Connected` follows once the channel opens.
    pub async fn on_remote_answer(&mut self, sdp: SessionDescription) -> Result<(), NegotiationError> {
        self.require("remote answer", NegotiationRole::Offering, NegotiationState::AwaitingAnswer)?;
        if self.remote_description_set {
            return Err(NegotiationError::InvalidTransition {
                op: "remote answer",
                state: self.state,
            });
        }
        self.apply_remote_description(sdp).await
    }

    async fn apply_remote_description(&mut self, sdp: SessionDescription) -> Result<(), NegotiationError> {
        if let Err(e) = self.transport.set_remote_description(sdp).await {
            let err = NegotiationError::Transport { op: "set remote description", source: e };
            return Err(self.abort(err).await);
        }
        self.remote_description_set = true;

        // Apply buffered candidates (if any).
        let buffered = std::mem::take(&mut self.pending_candidates);
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "applying buffered ice candidates");
        }
        for c in buffered {
            self.add_candidate(c).await;
        }
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) {
        // One bad candidate does not doom the connection; others may work.
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!(room = %self.room, "add ice candidate failed: {e:#}");
        }
    }

    pub async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.state == NegotiationState::Closed {
            return Err(NegotiationError::InvalidTransition {
                op: "remote candidate",
                state: self.state,
            });
        }
        if self.remote_description_set {
            self.add_candidate(candidate).await;
        } else {
            self.pending_candidates.push(candidate);
        }
        Ok(())
    }

    /// Trickles a candidate gathered by our transport to the peer.
    pub async fn on_local_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.state == NegotiationState::Closed {
            return Ok(());
        }
        let env = SignalingEnvelope::IceCandidate {
            room: self.room.to_string(),
            candidate,
        };
        // Losing one candidate is not fatal to the negotiation.
        if let Err(e) = self.signal.send(env).await {
            warn!(room = %self.room, "send ice candidate failed: {e}");
        }
        Ok(())
    }

    /// Answering side: the transport announced the channel the peer created.
    pub fn on_data_channel(&mut self, channel: Arc<dyn DataChannel>) -> Result<(), NegotiationError> {
        if self.role != NegotiationRole::Answering {
            return Err(NegotiationError::WrongRole {
                op: "remote data channel",
                role: self.role,
            });
        }
        match self.state {
            NegotiationState::OfferReceived | NegotiationState::AnswerCreated => {
                self.channel = Some(channel);
                Ok(())
            }
            state => Err(NegotiationError::InvalidTransition {
                op: "remote data channel",
                state,
            }),
        }
    }

    pub fn on_channel_open(&mut self) -> Result<(), NegotiationError> {
        match self.state {
            NegotiationState::Connected => Ok(()),
            NegotiationState::AwaitingAnswer | NegotiationState::AnswerCreated
                if self.remote_description_set =>
            {
                if self.channel.is_none() {
                    return Err(NegotiationError::MissingChannel);
                }
                self.set_state(NegotiationState::Connected);
                info!(room = %self.room, role = ?self.role, "data channel open");
                Ok(())
            }
            state => Err(NegotiationError::InvalidTransition {
                op: "channel open",
                state,
            }),
        }
    }

    /// Releases the data channel and the peer connection. Idempotent.
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("close datachannel: {e:#}");
            }
        }
        if let Err(e) = self.transport.close().await {
            debug!("close peer connection: {e:#}");
        }
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.set_state(NegotiationState::Closed);
    }
}
