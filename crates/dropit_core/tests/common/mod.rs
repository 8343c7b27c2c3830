/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory stand-ins for the relay and the peer connection.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use dropit_core::error::SignalingError;
use dropit_core::signaling::{SignalSink, SignalingEvent};
use dropit_core::transport::{DataChannel, PeerTransport, TransportEvent};
use dropit_protocol::{Frame, IceCandidate, SdpType, SessionDescription, SignalingEnvelope};
use tokio::sync::mpsc;

/// Two-member room relay: joins are forwarded only once both members are in.
pub struct LoopRelay {
    joined: Mutex<[bool; 2]>,
    members: [mpsc::Sender<SignalingEvent>; 2],
}

impl LoopRelay {
    /// Returns the relay and each member's inbound event stream, already `Opened`.
    pub fn new() -> (Arc<Self>, [mpsc::Receiver<SignalingEvent>; 2]) {
        let (tx0, rx0) = mpsc::channel(256);
        let (tx1, rx1) = mpsc::channel(256);
        tx0.try_send(SignalingEvent::Opened).unwrap();
        tx1.try_send(SignalingEvent::Opened).unwrap();
        let relay = Arc::new(Self {
            joined: Mutex::new([false, false]),
            members: [tx0, tx1],
        });
        (relay, [rx0, rx1])
    }

    pub fn sink(self: &Arc<Self>, side: usize) -> Arc<dyn SignalSink> {
        Arc::new(LoopSignal {
            side,
            relay: self.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

struct LoopSignal {
    side: usize,
    relay: Arc<LoopRelay>,
    closed: AtomicBool,
}

#[async_trait]
impl SignalSink for LoopSignal {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::NotOpen);
        }
        let other = 1 - self.side;
        match envelope {
            SignalingEnvelope::Join { room } => {
                let peer_present = {
                    let mut joined = self.relay.joined.lock().unwrap();
                    joined[self.side] = true;
                    joined[other]
                };
                let _ = self.relay.members[self.side]
                    .send(SignalingEvent::Joined(room.clone()))
                    .await;
                if peer_present {
                    let _ = self.relay.members[other]
                        .send(SignalingEvent::PeerJoined(room))
                        .await;
                }
            }
            env => {
                let both = {
                    let joined = self.relay.joined.lock().unwrap();
                    joined[0] && joined[1]
                };
                if both {
                    let _ = self.relay.members[other].send(SignalingEvent::from(env)).await;
                }
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Link {
    events: [mpsc::UnboundedSender<TransportEvent>; 2],
    closed: AtomicBool,
    opens: bool,
}

/// Peer connection pair; side 0 offers, side 1 answers.
///
/// The channel "opens" on both sides once the offerer applies the answer.
pub struct LoopTransport {
    side: usize,
    link: Arc<Link>,
}

pub fn transport_pair(
    opens: bool,
) -> [(LoopTransport, mpsc::UnboundedReceiver<TransportEvent>); 2] {
    let (tx0, rx0) = mpsc::unbounded_channel();
    let (tx1, rx1) = mpsc::unbounded_channel();
    let link = Arc::new(Link {
        events: [tx0, tx1],
        closed: AtomicBool::new(false),
        opens,
    });
    [
        (
            LoopTransport {
                side: 0,
                link: link.clone(),
            },
            rx0,
        ),
        (LoopTransport { side: 1, link }, rx1),
    ]
}

#[async_trait]
impl PeerTransport for LoopTransport {
    async fn create_data_channel(&self, _label: &str) -> Result<Arc<dyn DataChannel>> {
        Ok(Arc::new(LoopChannel {
            side: self.side,
            link: self.link.clone(),
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("offer-from-{}", self.side)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!("answer-from-{}", self.side)))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<()> {
        let _ = self.link.events[self.side].send(TransportEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:{} 1 udp 1 127.0.0.1 9 typ host", self.side),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.kind == SdpType::Answer && self.link.opens {
            let other = 1 - self.side;
            let remote = Arc::new(LoopChannel {
                side: other,
                link: self.link.clone(),
            });
            let _ = self.link.events[other].send(TransportEvent::DataChannel(remote));
            let _ = self.link.events[other].send(TransportEvent::ChannelOpen);
            let _ = self.link.events[self.side].send(TransportEvent::ChannelOpen);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct LoopChannel {
    side: usize,
    link: Arc<Link>,
}

#[async_trait]
impl DataChannel for LoopChannel {
    fn label(&self) -> String {
        "fileTransfer".to_string()
    }

    fn is_open(&self) -> bool {
        !self.link.closed.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: &Frame) -> Result<usize> {
        if !self.is_open() {
            bail!("channel closed");
        }
        let _ = self.link.events[1 - self.side].send(TransportEvent::Message(frame.clone()));
        Ok(frame.len())
    }

    async fn buffered_amount(&self) -> Option<usize> {
        Some(0)
    }

    async fn close(&self) -> Result<()> {
        if !self.link.closed.swap(true, Ordering::SeqCst) {
            let _ = self.link.events[1 - self.side].send(TransportEvent::ChannelClosed);
        }
        Ok(())
    }
}
