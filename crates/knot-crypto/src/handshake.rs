//! Signed ephemeral-key handshake.
//!
//! Each side sends exactly one `hs1` envelope: a fresh X25519 ephemeral
//! public key plus the identity it expects to be talking to, signed with
//! its long-term Ed25519 key. Validation pins the sender to the peer id
//! configured out of band; the signature alone is not enough, since a
//! correctly-signed message from the wrong identity must still be
//! rejected.
//!
//! The session key is `HKDF-SHA256(shared_secret, info)` where `info`
//! orders the two static ids lexicographically, so initiator and
//! responder compute the same bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use knot_core::{Envelope, HANDSHAKE_TYPE};

use crate::identity::{verify_detached, IdentityKeypair, PeerId};
use crate::kdf::hkdf_sha256;
use crate::CryptoError;

/// Context label appended to the HKDF info string.
const INFO_CONTEXT: &str = "chat";

/// Handshake validation failures. Each aborts only the current connection
/// attempt; the orchestrator keeps accepting and retrying.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unexpected handshake message type '{0}' (expected '{HANDSHAKE_TYPE}')")]
    UnexpectedType(String),

    #[error("peer authentication failed: received public key is not the expected peer")]
    WrongPeer,

    #[error("handshake signature is invalid (Ed25519 verification failed)")]
    BadSignature,

    #[error("malformed handshake payload: ephemeral key (epk) field missing")]
    MissingEphemeralKey,

    #[error("malformed handshake payload: ephemeral key is not a valid X25519 point")]
    InvalidEphemeralKey,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// 32-byte session key, derived once per session. Overwritten with zeros
/// when dropped; never logged or serialized.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material is never printed.
        write!(f, "SessionKey(..)")
    }
}

/// One side of an in-flight handshake, holding the per-session ephemeral
/// keypair. Consumed by [`Handshake::finish`]; neither the ephemeral
/// secret nor the raw shared secret outlives key derivation.
pub struct Handshake {
    eph_secret: EphemeralSecret,
    eph_public: X25519PublicKey,
}

impl Handshake {
    /// Generate a fresh ephemeral X25519 keypair for this session only.
    pub fn new() -> Self {
        let eph_secret = EphemeralSecret::random_from_rng(OsRng);
        let eph_public = X25519PublicKey::from(&eph_secret);
        Self {
            eph_secret,
            eph_public,
        }
    }

    /// Build this side's signed `hs1` envelope.
    pub fn hello(&self, identity: &IdentityKeypair, expected_peer: &PeerId) -> Envelope {
        let payload = format!(
            "epk:{}|peer:{}",
            STANDARD.encode(self.eph_public.as_bytes()),
            expected_peer.as_str()
        );
        let signature = STANDARD.encode(identity.sign(payload.as_bytes()));
        Envelope::new(
            HANDSHAKE_TYPE,
            identity.peer_id().as_str(),
            expected_peer.as_str(),
            payload,
            signature,
        )
    }

    /// Validate the peer's envelope and derive the session key.
    ///
    /// Consumes the ephemeral secret; on success the only surviving key
    /// material is the returned [`SessionKey`].
    pub fn finish(
        self,
        envelope: &Envelope,
        identity: &IdentityKeypair,
        expected_peer: &PeerId,
    ) -> Result<SessionKey, HandshakeError> {
        let peer_ephemeral = validate_hello(envelope, expected_peer)?;

        let shared = self.eph_secret.diffie_hellman(&peer_ephemeral);

        let info = format!(
            "{}:{}",
            canonical_pair(identity.peer_id().as_str(), expected_peer.as_str()),
            INFO_CONTEXT
        );
        let mut okm = hkdf_sha256(shared.as_bytes(), None, info.as_bytes(), 32)?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&okm);
        okm.zeroize();
        Ok(SessionKey::from_bytes(key))
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a received `hs1` envelope against the expected peer identity.
///
/// Returns the peer's ephemeral public key on success.
pub fn validate_hello(
    envelope: &Envelope,
    expected_peer: &PeerId,
) -> Result<X25519PublicKey, HandshakeError> {
    if envelope.kind != HANDSHAKE_TYPE {
        return Err(HandshakeError::UnexpectedType(envelope.kind.clone()));
    }
    if envelope.from != expected_peer.as_str() {
        return Err(HandshakeError::WrongPeer);
    }
    if !verify_detached(&envelope.from, &envelope.payload, &envelope.signature) {
        return Err(HandshakeError::BadSignature);
    }

    let epk_b64 = envelope
        .payload
        .split('|')
        .find_map(|field| field.strip_prefix("epk:"))
        .ok_or(HandshakeError::MissingEphemeralKey)?;

    let bytes = STANDARD
        .decode(epk_b64)
        .map_err(|_| HandshakeError::InvalidEphemeralKey)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| HandshakeError::InvalidEphemeralKey)?;

    Ok(X25519PublicKey::from(bytes))
}

/// Join two peer ids in lexicographic order. Both sides compute the same
/// HKDF info string regardless of who initiated.
fn canonical_pair(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(
        a: &IdentityKeypair,
        b: &IdentityKeypair,
    ) -> Result<(SessionKey, SessionKey), HandshakeError> {
        let hs_a = Handshake::new();
        let hs_b = Handshake::new();

        let hello_a = hs_a.hello(a, &b.peer_id());
        let hello_b = hs_b.hello(b, &a.peer_id());

        let key_a = hs_a.finish(&hello_b, a, &b.peer_id())?;
        let key_b = hs_b.finish(&hello_a, b, &a.peer_id())?;
        Ok((key_a, key_b))
    }

    #[test]
    fn test_handshake_symmetry() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();

        let (key_a, key_b) = exchange(&a, &b).unwrap();
        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    }

    #[test]
    fn test_fresh_ephemerals_give_fresh_keys() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();

        let (first, _) = exchange(&a, &b).unwrap();
        let (second, _) = exchange(&a, &b).unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_wrong_peer_rejected() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();
        let c = IdentityKeypair::generate();

        // C's hello is correctly signed by C, but A expects B.
        let hs_c = Handshake::new();
        let hello_c = hs_c.hello(&c, &a.peer_id());

        let hs_a = Handshake::new();
        let result = hs_a.finish(&hello_c, &a, &b.peer_id());
        assert!(matches!(result, Err(HandshakeError::WrongPeer)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();

        let hs_b = Handshake::new();
        let mut hello_b = hs_b.hello(&b, &a.peer_id());
        hello_b.payload.push('x');

        let hs_a = Handshake::new();
        let result = hs_a.finish(&hello_b, &a, &b.peer_id());
        assert!(matches!(result, Err(HandshakeError::BadSignature)));
    }

    #[test]
    fn test_unexpected_type_rejected() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();

        let hs_b = Handshake::new();
        let mut hello_b = hs_b.hello(&b, &a.peer_id());
        hello_b.kind = "hs2".to_string();

        let result = validate_hello(&hello_b, &b.peer_id());
        assert!(matches!(result, Err(HandshakeError::UnexpectedType(_))));
    }

    #[test]
    fn test_missing_epk_rejected() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();

        // Re-sign a payload without the epk field so the signature is valid.
        let payload = format!("peer:{}", a.peer_id());
        let signature = STANDARD.encode(b.sign(payload.as_bytes()));
        let envelope = Envelope::new(
            HANDSHAKE_TYPE,
            b.peer_id().as_str(),
            a.peer_id().as_str(),
            payload,
            signature,
        );

        let result = validate_hello(&envelope, &b.peer_id());
        assert!(matches!(result, Err(HandshakeError::MissingEphemeralKey)));
    }

    #[test]
    fn test_garbage_epk_rejected() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();

        let payload = format!("epk:###garbage###|peer:{}", a.peer_id());
        let signature = STANDARD.encode(b.sign(payload.as_bytes()));
        let envelope = Envelope::new(
            HANDSHAKE_TYPE,
            b.peer_id().as_str(),
            a.peer_id().as_str(),
            payload,
            signature,
        );

        let result = validate_hello(&envelope, &b.peer_id());
        assert!(matches!(result, Err(HandshakeError::InvalidEphemeralKey)));
    }

    #[test]
    fn test_canonical_pair_is_order_independent() {
        assert_eq!(canonical_pair("aaa", "bbb"), canonical_pair("bbb", "aaa"));
        assert_eq!(canonical_pair("aaa", "bbb"), "aaa:bbb");
    }
}
