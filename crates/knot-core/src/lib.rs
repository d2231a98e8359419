//! Core KNOT protocol types, line framing, and constants.
//!
//! This crate provides:
//! - The handshake envelope exchanged as one JSON line per direction
//! - The data-frame line codec (`<seq>|<base64 body>`)
//! - AAD construction for sealed frames
//! - The strictly-increasing sequence gate used for replay rejection

#![forbid(unsafe_code)]

pub mod envelope;
pub mod frame;

pub use envelope::Envelope;
pub use frame::{DataFrame, SequenceGate};

/// Channel protocol version, authenticated as part of every frame's AAD.
pub const KNOT_VERSION: u8 = 1;

/// Handshake message type tag, first and only pre-session line per direction.
pub const HANDSHAKE_TYPE: &str = "hs1";

/// Maximum accepted length of a single wire line (16 KiB).
/// Bounds memory exposure to a malicious or buggy peer; longer lines are
/// drained and discarded, never buffered in full.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Control message sent right after session establishment as a liveness probe.
pub const READY_PROBE: &str = "[/ready]";

#[derive(Debug, thiserror::Error)]
pub enum KnotError {
    #[error("invalid handshake envelope: {0}")]
    InvalidEnvelope(String),
    #[error("json encode error: {0}")]
    JsonEncode(String),
}
