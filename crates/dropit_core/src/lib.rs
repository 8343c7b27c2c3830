/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod error;
pub mod negotiation;
pub mod net_metrics;
pub mod receiver;
pub mod room;
pub mod sender;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod ui_events;
pub mod webrtc_p2p;

pub use dropit_protocol as protocol;
