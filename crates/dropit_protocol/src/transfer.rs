/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// Data channel messages are practically limited (~16KB) across implementations.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Text frame closing a file's chunk stream. Never a JSON object, so it cannot
/// collide with a metadata frame.
pub const END_MARKER: &str = "__dropit_eof__";

/// Announces the next file: `{"name": ..., "type": ..., "size": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    pub size: u64,
}

/// A data channel message as the transport delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(t) => t.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    Metadata(FileMetadata),
    Chunk(Bytes),
    End,
}

impl TransferMessage {
    pub fn encode(&self) -> serde_json::Result<Frame> {
        Ok(match self {
            TransferMessage::Metadata(meta) => Frame::Text(serde_json::to_string(meta)?),
            TransferMessage::Chunk(bytes) => Frame::Binary(bytes.clone()),
            TransferMessage::End => Frame::Text(END_MARKER.to_string()),
        })
    }

    /// Stateless classification of a frame; ordering rules are enforced by
    /// [`FrameDecoder`].
    pub fn decode(frame: Frame) -> Result<Self, ProtocolViolation> {
        match frame {
            Frame::Text(text) if text == END_MARKER => Ok(TransferMessage::End),
            Frame::Text(text) => serde_json::from_str::<FileMetadata>(&text)
                .map(TransferMessage::Metadata)
                .map_err(|e| ProtocolViolation::MalformedMetadata(e.to_string())),
            Frame::Binary(bytes) => Ok(TransferMessage::Chunk(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("chunk of {len} bytes with no file announced")]
    ChunkWithoutMetadata { len: usize },
    #[error("file {name}: received {received} bytes, declared size is {declared}")]
    Overflow {
        name: String,
        declared: u64,
        received: u64,
    },
    #[error("file {name}: end marker after {received} of {declared} bytes")]
    Truncated {
        name: String,
        declared: u64,
        received: u64,
    },
    #[error("file {name}: declared size {declared} exceeds limit {limit}")]
    TooLarge { name: String, declared: u64, limit: u64 },
    #[error("malformed metadata frame: {0}")]
    MalformedMetadata(String),
}

#[derive(Debug)]
struct Announced {
    name: String,
    declared: u64,
    received: u64,
}

#[derive(Debug, Default)]
enum DecoderState {
    #[default]
    Idle,
    Receiving(Announced),
    /// The announced file was rejected; its remaining chunks are dropped.
    Skipping,
}

/// Validates frame ordering: every chunk must belong to an announced file and
/// never take it past its declared size.
///
/// A new metadata frame replaces whatever file was in flight; the caller sees
/// the replaced file through [`FrameDecoder::in_flight`] beforehand if it
/// cares. A violation is reported once: the rest of the offending file's
/// chunks are dropped until the next metadata frame or end marker.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(None)` is a chunk of a skipped file.
    pub fn decode(&mut self, frame: Frame) -> Result<Option<TransferMessage>, ProtocolViolation> {
        let msg = match TransferMessage::decode(frame) {
            Ok(m) => m,
            Err(e) => {
                self.skip_current();
                return Err(e);
            }
        };
        match &msg {
            TransferMessage::Metadata(meta) => {
                self.state = DecoderState::Receiving(Announced {
                    name: meta.name.clone(),
                    declared: meta.size,
                    received: 0,
                });
            }
            TransferMessage::Chunk(bytes) => match &mut self.state {
                DecoderState::Idle => {
                    self.skip_current();
                    return Err(ProtocolViolation::ChunkWithoutMetadata { len: bytes.len() });
                }
                DecoderState::Skipping => return Ok(None),
                DecoderState::Receiving(cur) => {
                    let received = cur.received.saturating_add(bytes.len() as u64);
                    if received > cur.declared {
                        let err = ProtocolViolation::Overflow {
                            name: cur.name.clone(),
                            declared: cur.declared,
                            received,
                        };
                        self.skip_current();
                        return Err(err);
                    }
                    cur.received = received;
                }
            },
            TransferMessage::End => {
                if let DecoderState::Receiving(cur) = std::mem::take(&mut self.state) {
                    if cur.received < cur.declared {
                        return Err(ProtocolViolation::Truncated {
                            name: cur.name,
                            declared: cur.declared,
                            received: cur.received,
                        });
                    }
                }
            }
        }
        Ok(Some(msg))
    }

    /// `(declared, received)` of the announced file, if any.
    pub fn in_flight(&self) -> Option<(u64, u64)> {
        match &self.state {
            DecoderState::Receiving(c) => Some((c.declared, c.received)),
            _ => None,
        }
    }

    /// Drops the rest of the current file's chunks without reporting them.
    pub fn skip_current(&mut self) {
        self.state = DecoderState::Skipping;
    }

    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
    }
}
