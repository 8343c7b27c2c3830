/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! One peer-to-peer session: room join, negotiation, then file exchange.
//!
//! Everything that touches the negotiation state machine or the receive
//! buffer runs in the single task spawned by [`spawn_session`]. Transport
//! callbacks and the signaling socket only feed it events.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dropit_protocol::{Frame, SignalingEnvelope};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DropConfig;
use crate::error::NegotiationError;
use crate::negotiation::{NegotiationRole, NegotiationState, Negotiator};
use crate::net_metrics::{MetricsSnapshot, TransferMetrics};
use crate::receiver::{ReceiveEvent, Reassembler};
use crate::room::RoomId;
use crate::sender::{OutgoingFile, QueueSummary, SenderPipeline};
use crate::signaling::{SignalSink, SignalingClient, SignalingEvent};
use crate::transport::{PeerState, PeerTransport, TransportEvent};
use crate::ui_events::{emit, Direction, UiEvent, UiEventKind, UiEventTx};
use crate::webrtc_p2p::WebrtcTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the room and makes the offer.
    Sender,
    /// Joins a room it was told about and answers.
    Receiver,
}

impl Role {
    pub fn negotiation_role(self) -> NegotiationRole {
        match self {
            Role::Sender => NegotiationRole::Offering,
            Role::Receiver => NegotiationRole::Answering,
        }
    }
}

#[derive(Debug)]
pub enum SessionCommand {
    SendFiles(Vec<OutgoingFile>),
    Close,
}

/// Event sources and sinks a session runs on.
pub struct SessionIo<T> {
    pub transport: T,
    pub transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    pub signal: Arc<dyn SignalSink>,
    pub signal_events: mpsc::Receiver<SignalingEvent>,
}

pub struct SessionHandle {
    room: RoomId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    join: JoinHandle<Result<()>>,
    metrics: Arc<TransferMetrics>,
}

impl SessionHandle {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Queues files; they go out once the data channel is open.
    pub fn send_files(&self, files: Vec<OutgoingFile>) -> Result<()> {
        self.commands
            .send(SessionCommand::SendFiles(files))
            .map_err(|_| anyhow!("session has ended"))
    }

    pub fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Waits for the session task; `Err` if it ended on a failure.
    pub async fn wait(self) -> Result<()> {
        self.join.await.context("session task panicked")?
    }
}

/// Connects to the relay, creates the peer connection and starts the session.
pub async fn start_session(
    cfg: &DropConfig,
    role: Role,
    room: RoomId,
    events: UiEventTx,
) -> Result<SessionHandle> {
    let metrics = Arc::new(TransferMetrics::new());
    let (client, signal_events) = SignalingClient::connect(
        &cfg.signaling_url,
        Duration::from_secs(cfg.ping_interval_secs),
        metrics.clone(),
    )
    .await
    .context("connect signaling relay")?;

    let (transport, transport_events) = match WebrtcTransport::new(cfg, metrics.clone()).await {
        Ok(v) => v,
        Err(e) => {
            client.close().await;
            return Err(e.context("create peer connection"));
        }
    };

    let io = SessionIo {
        transport,
        transport_events,
        signal: Arc::new(client),
        signal_events,
    };
    Ok(spawn_session(cfg, role, room, io, events, metrics))
}

pub fn spawn_session<T: PeerTransport + 'static>(
    cfg: &DropConfig,
    role: Role,
    room: RoomId,
    io: SessionIo<T>,
    events: UiEventTx,
    metrics: Arc<TransferMetrics>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let SessionIo {
        transport,
        transport_events,
        signal,
        signal_events,
    } = io;

    let session = Session {
        role,
        room: room.clone(),
        chunk_size: cfg.chunk_size,
        buffered_amount_high: cfg.buffered_amount_high,
        connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
        negotiator: Negotiator::new(role.negotiation_role(), room.clone(), transport, signal.clone()),
        reassembler: Reassembler::new(cfg.max_file_size),
        signal,
        events,
        metrics: metrics.clone(),
        pending_files: Vec::new(),
        feed: None,
        sender_task: None,
        join_replied: false,
        deadline: None,
    };
    let join = tokio::spawn(session.run(signal_events, transport_events, cmd_rx));

    SessionHandle {
        room,
        commands: cmd_tx,
        join,
        metrics,
    }
}

type Flow = ControlFlow<Result<()>>;

struct Session<T: PeerTransport> {
    role: Role,
    room: RoomId,
    chunk_size: usize,
    buffered_amount_high: usize,
    connect_timeout: Duration,
    negotiator: Negotiator<T>,
    reassembler: Reassembler,
    signal: Arc<dyn SignalSink>,
    events: UiEventTx,
    metrics: Arc<TransferMetrics>,
    pending_files: Vec<OutgoingFile>,
    feed: Option<mpsc::UnboundedSender<Vec<OutgoingFile>>>,
    sender_task: Option<JoinHandle<QueueSummary>>,
    join_replied: bool,
    deadline: Option<Instant>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

impl<T: PeerTransport + 'static> Session<T> {
    async fn run(
        mut self,
        signal_events: mpsc::Receiver<SignalingEvent>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<()> {
        info!(room = %self.room, role = ?self.role, "session started");
        let outcome = self.event_loop(signal_events, transport_events, commands).await;
        self.shutdown().await;
        if let Err(e) = &outcome {
            error!(room = %self.room, "session failed: {e:#}");
            let _ = self.events.send(UiEvent::error(format!("{e:#}")));
        }
        emit(&self.events, UiEventKind::Closed);
        info!(room = %self.room, "session closed");
        outcome
    }

    async fn event_loop(
        &mut self,
        mut signal_events: mpsc::Receiver<SignalingEvent>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<()> {
        self.signal
            .send(SignalingEnvelope::Join {
                room: self.room.to_string(),
            })
            .await
            .context("join room")?;

        let mut signaling_open = true;
        loop {
            let deadline = self.deadline;
            let flow = tokio::select! {
                cmd = commands.recv() => self.on_command(cmd),
                ev = signal_events.recv(), if signaling_open => match ev {
                    Some(SignalingEvent::Closed) | None => {
                        signaling_open = false;
                        self.on_signaling_closed()
                    }
                    Some(ev) => self.on_signal(ev).await,
                },
                ev = transport_events.recv() => match ev {
                    Some(ev) => self.on_transport(ev).await,
                    None => ControlFlow::Break(Ok(())),
                },
                _ = sleep_until_opt(deadline) => ControlFlow::Break(Err(anyhow!(
                    "peer connection not established within {}s",
                    self.connect_timeout.as_secs()
                ))),
            };
            if let ControlFlow::Break(outcome) = flow {
                return outcome;
            }
        }
    }

    async fn shutdown(&mut self) {
        self.feed = None;
        if let Some(task) = self.sender_task.take() {
            task.abort();
        }
        self.negotiator.close().await;
        self.publish_transitions();
        self.signal.close().await;
    }

    fn on_command(&mut self, cmd: Option<SessionCommand>) -> Flow {
        match cmd {
            Some(SessionCommand::SendFiles(files)) => {
                debug!(count = files.len(), "files queued");
                match &self.feed {
                    Some(feed) => {
                        if feed.send(files).is_err() {
                            warn!("sender pipeline has stopped, files dropped");
                        }
                    }
                    None => self.pending_files.extend(files),
                }
                ControlFlow::Continue(())
            }
            Some(SessionCommand::Close) | None => ControlFlow::Break(Ok(())),
        }
    }

    fn same_room(&self, room: &str) -> bool {
        if room == self.room.as_str() {
            return true;
        }
        warn!(expected = %self.room, got = %room, "dropping envelope for another room");
        false
    }

    async fn on_signal(&mut self, ev: SignalingEvent) -> Flow {
        match ev {
            SignalingEvent::Opened => emit(&self.events, UiEventKind::SignalingConnected),
            SignalingEvent::Joined(room) => {
                info!(%room, "joined room");
                emit(&self.events, UiEventKind::RoomJoined { room });
            }
            SignalingEvent::PeerJoined(room) => {
                if !self.same_room(&room) {
                    return ControlFlow::Continue(());
                }
                info!(%room, "peer joined");
                emit(&self.events, UiEventKind::PeerJoined);
                match self.role.negotiation_role() {
                    NegotiationRole::Offering => {
                        if self.negotiator.state() == NegotiationState::Idle {
                            self.arm_deadline();
                            let r = self.negotiator.initiate().await;
                            return self.after_negotiation(r);
                        }
                    }
                    NegotiationRole::Answering => {
                        // The relay only forwards joins once both members are
                        // present, so the first member never saw ours.
                        if !self.join_replied {
                            self.join_replied = true;
                            let env = SignalingEnvelope::Join {
                                room: self.room.to_string(),
                            };
                            if let Err(e) = self.signal.send(env).await {
                                warn!("announce to peer failed: {e}");
                            }
                        }
                    }
                }
            }
            SignalingEvent::RemoteOffer { room, sdp } => {
                if self.same_room(&room) {
                    self.arm_deadline();
                    let r = self.negotiator.on_remote_offer(sdp).await;
                    return self.after_negotiation(r);
                }
            }
            SignalingEvent::RemoteAnswer { room, sdp } => {
                if self.same_room(&room) {
                    let r = self.negotiator.on_remote_answer(sdp).await;
                    return self.after_negotiation(r);
                }
            }
            SignalingEvent::RemoteCandidate { room, candidate } => {
                if self.same_room(&room) {
                    let r = self.negotiator.on_remote_candidate(candidate).await;
                    return self.after_negotiation(r);
                }
            }
            SignalingEvent::Error(e) => {
                warn!("signaling: {e}");
                let _ = self.events.send(UiEvent::error(e));
            }
            SignalingEvent::Closed => return self.on_signaling_closed(),
        }
        ControlFlow::Continue(())
    }

    fn on_signaling_closed(&mut self) -> Flow {
        if self.negotiator.is_connected() {
            // The data channel no longer needs the relay.
            info!("signaling closed, data channel stays up");
            return ControlFlow::Continue(());
        }
        ControlFlow::Break(Err(anyhow!(
            "signaling connection closed before the peer connected"
        )))
    }

    async fn on_transport(&mut self, ev: TransportEvent) -> Flow {
        match ev {
            TransportEvent::LocalCandidate(c) => {
                let r = self.negotiator.on_local_candidate(c).await;
                self.after_negotiation(r)
            }
            TransportEvent::DataChannel(dc) => {
                debug!(label = %dc.label(), "remote data channel");
                let r = self.negotiator.on_data_channel(dc);
                self.after_negotiation(r)
            }
            TransportEvent::ChannelOpen => {
                let r = self.negotiator.on_channel_open();
                let flow = self.after_negotiation(r);
                if self.negotiator.is_connected() && self.feed.is_none() {
                    self.deadline = None;
                    emit(&self.events, UiEventKind::ConnectionEstablished);
                    self.start_sender();
                }
                flow
            }
            TransportEvent::Message(frame) => {
                self.on_frame(frame);
                ControlFlow::Continue(())
            }
            TransportEvent::ChannelClosed => {
                info!(room = %self.room, "data channel closed");
                ControlFlow::Break(Ok(()))
            }
            TransportEvent::ChannelError(e) => {
                warn!("data channel error: {e}");
                let _ = self.events.send(UiEvent::error(format!("data channel: {e}")));
                ControlFlow::Continue(())
            }
            TransportEvent::PeerState(state) => match state {
                PeerState::Failed => ControlFlow::Break(Err(anyhow!("peer connection failed"))),
                PeerState::Closed => ControlFlow::Break(Ok(())),
                PeerState::Disconnected => {
                    warn!(room = %self.room, "peer connection disconnected");
                    ControlFlow::Continue(())
                }
                other => {
                    debug!(state = ?other, "peer connection state");
                    ControlFlow::Continue(())
                }
            },
        }
    }

    fn publish_transitions(&mut self) {
        for state in self.negotiator.take_transitions() {
            emit(&self.events, UiEventKind::NegotiationState { state });
        }
    }

    /// Recoverable errors are reported; an aborted negotiation ends the session.
    fn after_negotiation(&mut self, r: Result<(), NegotiationError>) -> Flow {
        self.publish_transitions();
        match r {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) if self.negotiator.state() == NegotiationState::Closed => {
                ControlFlow::Break(Err(anyhow::Error::new(e).context("negotiation failed")))
            }
            Err(e) => {
                warn!("negotiation: {e}");
                let _ = self.events.send(UiEvent::error(e));
                ControlFlow::Continue(())
            }
        }
    }

    fn arm_deadline(&mut self) {
        if self.deadline.is_none() && !self.negotiator.is_connected() {
            self.deadline = Some(Instant::now() + self.connect_timeout);
        }
    }

    fn start_sender(&mut self) {
        let Some(channel) = self.negotiator.channel() else {
            return;
        };
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let pipeline = SenderPipeline::new(
            channel,
            self.chunk_size,
            self.buffered_amount_high,
            self.events.clone(),
            self.metrics.clone(),
        );
        self.sender_task = Some(tokio::spawn(pipeline.run(feed_rx)));
        if !self.pending_files.is_empty() {
            let _ = feed_tx.send(std::mem::take(&mut self.pending_files));
        }
        self.feed = Some(feed_tx);
    }

    fn on_frame(&mut self, frame: Frame) {
        for ev in self.reassembler.ingest(frame) {
            match ev {
                ReceiveEvent::Violation(violation) => {
                    self.metrics.protocol_violation();
                    warn!("protocol violation: {violation}");
                    let _ = self.events.send(UiEvent::error(violation));
                }
                ReceiveEvent::Started { name, size } => {
                    emit(&self.events, UiEventKind::FileReceiveStarted { name, size });
                }
                ReceiveEvent::Progress { name, bytes, total } => emit(
                    &self.events,
                    UiEventKind::TransferProgress {
                        file_name: name,
                        bytes,
                        total,
                        direction: Direction::Incoming,
                    },
                ),
                ReceiveEvent::Completed(file) => {
                    self.metrics.file_received();
                    info!(name = %file.name, size = file.size, "file received");
                    emit(&self.events, UiEventKind::FileReceived { file });
                }
                ReceiveEvent::Discarded {
                    name,
                    received,
                    declared,
                } => {
                    self.metrics.file_failed();
                    let _ = self.events.send(UiEvent::error(format!(
                        "{name}: discarded after {received} of {declared} bytes"
                    )));
                }
            }
        }
    }
}
