/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as browsers serialize it: `{"type": "offer", "sdp": "v=0..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One relay message.
///
/// On the wire this is one of
/// `{"join": room}`, `{"sdp": {...}, "roomId": room}` or
/// `{"candidate": {...}, "roomId": room}`; offers and answers share the
/// `sdp` shape and are told apart by the description type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub enum SignalingEnvelope {
    Join { room: String },
    Offer { room: String, sdp: SessionDescription },
    Answer { room: String, sdp: SessionDescription },
    IceCandidate { room: String, candidate: IceCandidate },
}

impl SignalingEnvelope {
    pub fn room(&self) -> &str {
        match self {
            Self::Join { room }
            | Self::Offer { room, .. }
            | Self::Answer { room, .. }
            | Self::IceCandidate { room, .. } => room,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "candidate",
        }
    }

    /// Wraps a local description in the envelope matching its type.
    pub fn description(room: impl Into<String>, sdp: SessionDescription) -> Self {
        let room = room.into();
        match sdp.kind {
            SdpType::Offer => Self::Offer { room, sdp },
            SdpType::Answer => Self::Answer { room, sdp },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
}

impl TryFrom<WireEnvelope> for SignalingEnvelope {
    type Error = String;

    fn try_from(w: WireEnvelope) -> Result<Self, Self::Error> {
        match (w.join, w.sdp, w.candidate) {
            (Some(room), None, None) => {
                if room.trim().is_empty() {
                    return Err("empty room in join".to_string());
                }
                Ok(Self::Join { room })
            }
            (None, Some(sdp), None) => {
                let room = w.room_id.ok_or("sdp envelope without roomId")?;
                Ok(Self::description(room, sdp))
            }
            (None, None, Some(candidate)) => {
                let room = w.room_id.ok_or("candidate envelope without roomId")?;
                Ok(Self::IceCandidate { room, candidate })
            }
            (None, None, None) => Err("envelope has no join, sdp or candidate".to_string()),
            _ => Err("envelope mixes join, sdp and candidate".to_string()),
        }
    }
}

impl From<SignalingEnvelope> for WireEnvelope {
    fn from(env: SignalingEnvelope) -> Self {
        let mut w = WireEnvelope {
            join: None,
            sdp: None,
            candidate: None,
            room_id: None,
        };
        match env {
            SignalingEnvelope::Join { room } => w.join = Some(room),
            SignalingEnvelope::Offer { room, sdp } | SignalingEnvelope::Answer { room, sdp } => {
                w.sdp = Some(sdp);
                w.room_id = Some(room);
            }
            SignalingEnvelope::IceCandidate { room, candidate } => {
                w.candidate = Some(candidate);
                w.room_id = Some(room);
            }
        }
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_wire_shape() {
        let env = SignalingEnvelope::Join {
            room: "r1".to_string(),
        };
        let v: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(v, json!({"join": "r1"}));
    }

    #[test]
    fn offer_and_answer_share_sdp_field() {
        let offer = SignalingEnvelope::description("r1", SessionDescription::offer("v=0"));
        let v: serde_json::Value = serde_json::from_str(&offer.to_json().unwrap()).unwrap();
        assert_eq!(v, json!({"sdp": {"type": "offer", "sdp": "v=0"}, "roomId": "r1"}));

        let parsed =
            SignalingEnvelope::from_json(r#"{"sdp":{"type":"answer","sdp":"v=0"},"roomId":"r1"}"#)
                .unwrap();
        assert_eq!(
            parsed,
            SignalingEnvelope::Answer {
                room: "r1".to_string(),
                sdp: SessionDescription::answer("v=0"),
            }
        );
    }

    #[test]
    fn browser_candidate_is_accepted() {
        let text = r#"{"candidate":{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"},"roomId":"r1"}"#;
        let env = SignalingEnvelope::from_json(text).unwrap();
        match env {
            SignalingEnvelope::IceCandidate { room, candidate } => {
                assert_eq!(room, "r1");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert!(SignalingEnvelope::from_json("{}").is_err());
        assert!(SignalingEnvelope::from_json(r#"{"join":""}"#).is_err());
        assert!(SignalingEnvelope::from_json(r#"{"sdp":{"type":"offer","sdp":"x"}}"#).is_err());
        assert!(SignalingEnvelope::from_json(r#"{"join":"a","candidate":{"candidate":"c"},"roomId":"a"}"#).is_err());
        assert!(SignalingEnvelope::from_json(r#"{"sdp":{"type":"rollback","sdp":""},"roomId":"a"}"#).is_err());
        assert!(SignalingEnvelope::from_json("not json").is_err());
    }
}
