/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use dropit_protocol::{FileMetadata, Frame, FrameDecoder, ProtocolViolation, TransferMessage};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// A fully received file, held in memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReceivedFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip)]
    pub data: Bytes,
}

impl ReceivedFile {
    /// Writes the file into `dir` and returns the path used.
    ///
    /// The peer-chosen name is reduced to its last path component. Existing
    /// files are left alone: `a.txt` becomes `a (1).txt`, `a (2).txt`, ...
    pub async fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let name = sanitize_file_name(&self.name);
        let (stem, ext) = split_extension(&name);
        let mut n = 0u32;
        loop {
            let candidate = if n == 0 {
                name.clone()
            } else {
                format!("{stem} ({n}){ext}")
            };
            let path = dir.join(&candidate);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut f) => {
                    f.write_all(&self.data).await?;
                    f.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .last()
        .unwrap_or("");
    let cleaned: String = last.chars().filter(|c| !c.is_control() && *c != ':').collect();
    if cleaned.is_empty() {
        "received.bin".to_string()
    } else {
        cleaned
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    Started { name: String, size: u64 },
    Progress { name: String, bytes: u64, total: u64 },
    Completed(ReceivedFile),
    /// An incomplete file was dropped before its last byte arrived.
    Discarded { name: String, received: u64, declared: u64 },
    /// The stream broke the framing rules; reported once per offending file.
    Violation(ProtocolViolation),
}

/// Chunks of the file currently being received.
#[derive(Debug)]
struct ReceiveBuffer {
    meta: FileMetadata,
    chunks: Vec<Bytes>,
    received: u64,
}

impl ReceiveBuffer {
    fn new(meta: FileMetadata) -> Self {
        Self {
            meta,
            chunks: Vec::new(),
            received: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.meta.size
    }

    fn materialize(self) -> ReceivedFile {
        let mut data = BytesMut::with_capacity(self.received as usize);
        for c in self.chunks {
            data.extend_from_slice(&c);
        }
        ReceivedFile {
            name: self.meta.name,
            mime_type: self.meta.mime_type,
            size: self.meta.size,
            data: data.freeze(),
        }
    }
}

/// Turns the inbound frame stream into files.
///
/// Completion is driven by the byte count; the end marker only confirms it.
/// A violation drops the file it belongs to and the reassembler waits for
/// the next metadata frame.
pub struct Reassembler {
    decoder: FrameDecoder,
    buffer: Option<ReceiveBuffer>,
    max_file_size: u64,
}

impl Reassembler {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            buffer: None,
            max_file_size,
        }
    }

    /// `(name, received, declared)` of the file being assembled.
    pub fn in_progress(&self) -> Option<(&str, u64, u64)> {
        self.buffer
            .as_ref()
            .map(|b| (b.meta.name.as_str(), b.received, b.meta.size))
    }

    pub fn reset(&mut self) {
        self.decoder.reset();
        self.buffer = None;
    }

    pub fn ingest(&mut self, frame: Frame) -> Vec<ReceiveEvent> {
        let mut events = Vec::new();
        let msg = match self.decoder.decode(frame) {
            Ok(Some(m)) => m,
            Ok(None) => return events,
            Err(violation) => {
                // Overflow and truncation name the buffered file themselves.
                let named = matches!(
                    violation,
                    ProtocolViolation::Overflow { .. } | ProtocolViolation::Truncated { .. }
                );
                let prev = self.buffer.take();
                if !named {
                    Self::discard(prev, &mut events);
                }
                events.push(ReceiveEvent::Violation(violation));
                return events;
            }
        };

        match msg {
            TransferMessage::Metadata(meta) => {
                let prev = self.buffer.take();
                Self::discard(prev, &mut events);
                if meta.size > self.max_file_size {
                    self.decoder.skip_current();
                    events.push(ReceiveEvent::Violation(ProtocolViolation::TooLarge {
                        name: meta.name,
                        declared: meta.size,
                        limit: self.max_file_size,
                    }));
                    return events;
                }
                debug!(name = %meta.name, size = meta.size, "receiving file");
                events.push(ReceiveEvent::Started {
                    name: meta.name.clone(),
                    size: meta.size,
                });
                let buf = ReceiveBuffer::new(meta);
                if buf.is_complete() {
                    events.push(ReceiveEvent::Completed(buf.materialize()));
                } else {
                    self.buffer = Some(buf);
                }
            }
            TransferMessage::Chunk(bytes) => {
                let Some(buf) = self.buffer.as_mut() else {
                    self.decoder.skip_current();
                    events.push(ReceiveEvent::Violation(ProtocolViolation::ChunkWithoutMetadata {
                        len: bytes.len(),
                    }));
                    return events;
                };
                buf.received += bytes.len() as u64;
                buf.chunks.push(bytes);
                events.push(ReceiveEvent::Progress {
                    name: buf.meta.name.clone(),
                    bytes: buf.received,
                    total: buf.meta.size,
                });
                if buf.is_complete() {
                    if let Some(done) = self.buffer.take() {
                        events.push(ReceiveEvent::Completed(done.materialize()));
                    }
                }
            }
            TransferMessage::End => {}
        }
        events
    }

    fn discard(prev: Option<ReceiveBuffer>, events: &mut Vec<ReceiveEvent>) {
        let Some(prev) = prev else { return };
        warn!(
            name = %prev.meta.name,
            received = prev.received,
            declared = prev.meta.size,
            "discarding incomplete file"
        );
        events.push(ReceiveEvent::Discarded {
            name: prev.meta.name,
            received: prev.received,
            declared: prev.meta.size,
        });
    }
}
