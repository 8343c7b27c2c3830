/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dropit_protocol::{Frame, IceCandidate, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use std::sync::Arc;

use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::DropConfig;
use crate::net_metrics::TransferMetrics;
use crate::transport::{DataChannel, PeerState, PeerTransport, TransportEvent};

fn build_ice_servers(cfg: &DropConfig) -> Vec<RTCIceServer> {
    if cfg.ice_urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: cfg.ice_urls.clone(),
        username: cfg.ice_username.clone().unwrap_or_default(),
        credential: cfg.ice_credential.clone().unwrap_or_default(),
        ..Default::default()
    }]
}

async fn new_peer_connection(cfg: &DropConfig) -> Result<Arc<RTCPeerConnection>> {
    let api = APIBuilder::new().build();
    let pc = api
        .new_peer_connection(RTCConfiguration {
            ice_servers: build_ice_servers(cfg),
            ..Default::default()
        })
        .await
        .context("new peer connection")?;
    Ok(Arc::new(pc))
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn candidate_to_init(c: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: c.candidate,
        sdp_mid: c.sdp_mid,
        sdp_mline_index: c.sdp_mline_index,
        username_fragment: c.username_fragment,
    }
}

fn description_from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(anyhow!("unsupported sdp type: {other}")),
    }
}

fn description_to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        dropit_protocol::SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        dropit_protocol::SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    rtc.context("parse session description")
}

fn peer_state(st: RTCPeerConnectionState) -> PeerState {
    match st {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

/// Forwards channel callbacks into the session's event queue.
fn wire_channel(
    dc: &Arc<RTCDataChannel>,
    tx: mpsc::UnboundedSender<TransportEvent>,
    metrics: Arc<TransferMetrics>,
) {
    {
        let tx2 = tx.clone();
        dc.on_open(Box::new(move || {
            let _ = tx2.send(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }));
    }
    {
        let tx2 = tx.clone();
        dc.on_close(Box::new(move || {
            let _ = tx2.send(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }));
    }
    {
        let tx2 = tx.clone();
        dc.on_error(Box::new(move |e| {
            let _ = tx2.send(TransportEvent::ChannelError(e.to_string()));
            Box::pin(async {})
        }));
    }
    {
        let tx2 = tx.clone();
        dc.on_message(Box::new(move |m: DataChannelMessage| {
            metrics.channel_rx_add(m.data.len() as u64);
            let frame = if m.is_string {
                Frame::Text(String::from_utf8_lossy(&m.data).into_owned())
            } else {
                Frame::Binary(m.data)
            };
            let _ = tx2.send(TransportEvent::Message(frame));
            Box::pin(async {})
        }));
    }
    // The remote channel may already be open by the time it is announced.
    if dc.ready_state() == RTCDataChannelState::Open {
        let _ = tx.send(TransportEvent::ChannelOpen);
    }
}

/// [`PeerTransport`] over the `webrtc` crate.
pub struct WebrtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<TransportEvent>,
    metrics: Arc<TransferMetrics>,
}

impl WebrtcTransport {
    pub async fn new(
        cfg: &DropConfig,
        metrics: Arc<TransferMetrics>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let pc = new_peer_connection(cfg).await?;
        let (tx, rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Trickle ICE from us -> remote.
        {
            let tx2 = tx.clone();
            pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                let tx2 = tx2.clone();
                Box::pin(async move {
                    let Some(cand) = cand else { return };
                    match cand.to_json() {
                        Ok(init) => {
                            let _ = tx2.send(TransportEvent::LocalCandidate(candidate_from_init(init)));
                        }
                        Err(e) => warn!("webrtc candidate to_json failed: {e:#}"),
                    }
                })
            }));
        }

        // Incoming data channel (answering side).
        {
            let tx2 = tx.clone();
            let metrics2 = metrics.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let tx2 = tx2.clone();
                let metrics2 = metrics2.clone();
                Box::pin(async move {
                    debug!(label = %dc.label(), "webrtc remote data channel");
                    let handle = WebrtcDataChannel {
                        dc: dc.clone(),
                        metrics: metrics2.clone(),
                    };
                    let _ = tx2.send(TransportEvent::DataChannel(Arc::new(handle)));
                    wire_channel(&dc, tx2, metrics2);
                })
            }));
        }

        {
            let tx2 = tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                debug!(state = %st, "webrtc peer connection state");
                let _ = tx2.send(TransportEvent::PeerState(peer_state(st)));
                Box::pin(async {})
            }));
        }

        Ok((
            Self {
                pc,
                events: tx,
                metrics,
            },
            rx,
        ))
    }
}

#[async_trait]
impl PeerTransport for WebrtcTransport {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .context("create datachannel")?;
        wire_channel(&dc, self.events.clone(), self.metrics.clone());
        Ok(Arc::new(WebrtcDataChannel {
            dc,
            metrics: self.metrics.clone(),
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.context("create_offer")?;
        description_from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.context("create_answer")?;
        description_from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = description_to_rtc(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .context("set_local_description")
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = description_to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .context("set_remote_description")
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate_to_init(candidate))
            .await
            .context("add_ice_candidate")
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.context("close peer connection")
    }
}

pub struct WebrtcDataChannel {
    dc: Arc<RTCDataChannel>,
    metrics: Arc<TransferMetrics>,
}

#[async_trait]
impl DataChannel for WebrtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_frame(&self, frame: &Frame) -> Result<usize> {
        let n = match frame {
            Frame::Text(text) => self.dc.send_text(text.clone()).await,
            Frame::Binary(bytes) => self.dc.send(bytes).await,
        }
        .map_err(|e| anyhow!("dc send: {e:#}"))?;
        self.metrics.channel_tx_add(n as u64);
        Ok(n)
    }

    async fn buffered_amount(&self) -> Option<usize> {
        Some(self.dc.buffered_amount().await)
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await.context("close datachannel")
    }
}
