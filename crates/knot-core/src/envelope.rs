//! Handshake envelope: one JSON object per line, one line per direction.
//!
//! Wire keys are fixed: `type`, `from`, `to`, `payload`, `signature`,
//! `timestamp`. All key material travels base64-encoded inside string
//! fields; the signature covers the exact `payload` string.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::KnotError;

/// Signed handshake envelope.
///
/// `from` is the sender's base64 Ed25519 public key, `to` the sender's
/// expectation of who it is talking to. Created fresh per handshake
/// attempt and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub to: String,
    pub payload: String,
    pub signature: String,
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Build an envelope stamped with the current wall-clock time (ms).
    pub fn new(kind: &str, from: &str, to: &str, payload: String, signature: String) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            kind: kind.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            payload,
            signature,
            timestamp,
        }
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String, KnotError> {
        serde_json::to_string(self).map_err(|e| KnotError::JsonEncode(e.to_string()))
    }

    /// Parse an envelope from one received line.
    pub fn from_json(line: &str) -> Result<Self, KnotError> {
        serde_json::from_str(line).map_err(|e| KnotError::InvalidEnvelope(e.to_string()))
    }
}
