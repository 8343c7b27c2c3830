/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire types shared by peers and the room relay.
//!
//! Two independent protocols live here:
//! - [`signal`]: the JSON envelopes exchanged through the relay while two
//!   peers negotiate a connection;
//! - [`transfer`]: the framing spoken over the established data channel
//!   (metadata text frame, binary chunks, end-of-file sentinel).

pub mod signal;
pub mod transfer;

pub use signal::{IceCandidate, SdpType, SessionDescription, SignalingEnvelope};
pub use transfer::{
    FileMetadata, Frame, FrameDecoder, ProtocolViolation, TransferMessage, DEFAULT_CHUNK_SIZE,
    END_MARKER,
};
