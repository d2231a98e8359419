//! Data-frame line codec and replay gate.
//!
//! After the handshake every message travels as one line:
//!
//! ```text
//! <seq>|<base64(nonce || ciphertext+tag)>
//! ```
//!
//! `seq` is a decimal u64 counter starting at 0, per session per direction.
//! The AAD binds the sequence number and the channel version to the
//! ciphertext, so a frame replayed under a different sequence number fails
//! authentication.

use crate::KNOT_VERSION;

/// A parsed (not yet decrypted) data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub seq: u64,
    pub body: &'a str,
}

impl<'a> DataFrame<'a> {
    /// Parse a wire line. Returns `None` for malformed lines (missing
    /// separator, non-numeric seq); callers drop those silently.
    pub fn parse(line: &'a str) -> Option<Self> {
        let (seq, body) = line.split_once('|')?;
        let seq = seq.parse::<u64>().ok()?;
        Some(Self { seq, body })
    }

    /// Encode a frame as a wire line (no trailing newline).
    pub fn encode(seq: u64, body: &str) -> String {
        format!("{}|{}", seq, body)
    }
}

/// AAD for the frame with the given sequence number:
/// 8 bytes big-endian seq followed by the channel version byte.
pub fn aad_for(seq: u64) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = KNOT_VERSION;
    aad
}

/// Strictly-increasing sequence gate for replay rejection.
///
/// Accepts a frame only if its sequence number is greater than every
/// previously recorded one. There is no reordering window: a late frame is
/// dropped, not queued. `admits` and `record` are split so the session can
/// check before decryption and commit only after the tag authenticates.
///
/// Not thread-safe; owned by the single receive loop.
#[derive(Debug, Clone, Default)]
pub struct SequenceGate {
    highest: Option<u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Would a frame with this sequence number be accepted?
    pub fn admits(&self, seq: u64) -> bool {
        match self.highest {
            None => true,
            Some(h) => seq > h,
        }
    }

    /// Record an accepted sequence number. Call only after `admits`
    /// returned true and the frame authenticated.
    pub fn record(&mut self, seq: u64) {
        self.highest = Some(seq);
    }

    /// Highest sequence number accepted so far, if any.
    pub fn highest(&self) -> Option<u64> {
        self.highest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_frame() {
        let frame = DataFrame::parse("42|c29tZWJvZHk=").unwrap();
        assert_eq!(frame.seq, 42);
        assert_eq!(frame.body, "c29tZWJvZHk=");
    }

    #[test]
    fn test_parse_body_may_contain_separator() {
        // Split is on the first '|' only.
        let frame = DataFrame::parse("0|a|b").unwrap();
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.body, "a|b");
    }

    #[test]
    fn test_parse_malformed_lines() {
        assert!(DataFrame::parse("").is_none());
        assert!(DataFrame::parse("no separator").is_none());
        assert!(DataFrame::parse("abc|body").is_none());
        assert!(DataFrame::parse("-1|body").is_none());
        assert!(DataFrame::parse("1.5|body").is_none());
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let line = DataFrame::encode(7, "Ym9keQ==");
        assert_eq!(line, "7|Ym9keQ==");
        let frame = DataFrame::parse(&line).unwrap();
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.body, "Ym9keQ==");
    }

    #[test]
    fn test_aad_layout() {
        let aad = aad_for(0x0102030405060708);
        assert_eq!(&aad[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(aad[8], KNOT_VERSION);
    }

    #[test]
    fn test_aad_differs_per_seq() {
        assert_ne!(aad_for(0), aad_for(1));
    }

    #[test]
    fn test_gate_accepts_increasing() {
        let mut gate = SequenceGate::new();
        for seq in [0u64, 1, 2, 10, 11] {
            assert!(gate.admits(seq), "seq {} should be admitted", seq);
            gate.record(seq);
        }
        assert_eq!(gate.highest(), Some(11));
    }

    #[test]
    fn test_gate_rejects_replay_and_reorder() {
        let mut gate = SequenceGate::new();
        assert!(gate.admits(5));
        gate.record(5);

        // Exact replay
        assert!(!gate.admits(5));
        // Older than the watermark, even if never seen
        assert!(!gate.admits(3));
        // Newer still fine
        assert!(gate.admits(6));
    }

    #[test]
    fn test_gate_admits_zero_first() {
        let gate = SequenceGate::new();
        assert!(gate.admits(0));
    }

    #[test]
    fn test_gate_check_without_record() {
        let mut gate = SequenceGate::new();
        assert!(gate.admits(1));
        assert!(gate.admits(1)); // admits does not commit
        gate.record(1);
        assert!(!gate.admits(1));
    }
}
