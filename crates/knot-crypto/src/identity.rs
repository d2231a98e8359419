//! Ed25519 identity keys and peer ids.
//!
//! A **peer id** is the base64-encoded Ed25519 public key. It is the
//! protocol-level address: peers exchange it out of band and use it to
//! name who they are willing to talk to.
//!
//! # Example
//!
//! ```
//! use knot_crypto::identity::IdentityKeypair;
//!
//! let keypair = IdentityKeypair::generate();
//! println!("share this with your peer: {}", keypair.peer_id());
//!
//! let signature = keypair.sign(b"challenge");
//! assert!(keypair.verify(b"challenge", &signature));
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

use crate::CryptoError;

/// Peer id: base64-encoded Ed25519 public key (32 bytes → 44 characters).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Parse a peer id from its string representation.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|_| CryptoError::InvalidArgument("peer id is not valid base64".into()))?;

        if bytes.len() != 32 {
            return Err(CryptoError::InvalidArgument(format!(
                "invalid peer id length: expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Get the raw public key bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32], CryptoError> {
        let bytes = STANDARD
            .decode(&self.0)
            .map_err(|_| CryptoError::InvalidArgument("peer id is not valid base64".into()))?;

        bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidArgument("invalid key length".into()))
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// Long-term Ed25519 identity keypair.
///
/// Generated at process start, never transmitted. The signing key is
/// zeroized on drop by ed25519-dalek.
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from raw signing key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    /// Get the peer id (base64-encoded public key).
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_bytes(self.signing_key.verifying_key().as_bytes())
    }

    /// Get the public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        *self.signing_key.verifying_key().as_bytes()
    }

    /// Sign a message with this identity.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature against this identity's own public key.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let sig = Signature::from_bytes(signature);
        self.signing_key
            .verifying_key()
            .verify(message, &sig)
            .is_ok()
    }
}

/// Verify a base64-wrapped signature against a base64-wrapped public key.
///
/// Total over attacker-controlled input: any malformed key, message, or
/// signature yields `false`, never an error.
pub fn verify_detached(public_key_b64: &str, message: &str, signature_b64: &str) -> bool {
    let Ok(key_bytes) = STANDARD.decode(public_key_b64) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let Ok(sig_bytes) = STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key.verify(message.as_bytes(), &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = IdentityKeypair::generate();
        let peer_id = keypair.peer_id();

        // 32 bytes as padded base64 is 44 characters
        assert_eq!(peer_id.as_str().len(), 44);
    }

    #[test]
    fn test_sign_verify() {
        let keypair = IdentityKeypair::generate();
        let message = b"hello tether";

        let signature = keypair.sign(message);
        assert!(keypair.verify(message, &signature));
        assert!(!keypair.verify(b"wrong message", &signature));
    }

    #[test]
    fn test_peer_id_roundtrip() {
        let keypair = IdentityKeypair::generate();
        let peer_id = keypair.peer_id();

        let parsed = PeerId::parse(peer_id.as_str()).unwrap();
        assert_eq!(peer_id, parsed);
        assert_eq!(parsed.to_bytes().unwrap(), keypair.public_key_bytes());
    }

    #[test]
    fn test_peer_id_rejects_garbage() {
        assert!(PeerId::parse("###not-base64###").is_err());
        // Valid base64 but wrong length
        assert!(PeerId::parse("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_keypair_bytes_roundtrip() {
        let keypair = IdentityKeypair::generate();
        let restored = IdentityKeypair::from_bytes(&keypair.signing_key.to_bytes());
        assert_eq!(restored.public_key_bytes(), keypair.public_key_bytes());
    }

    #[test]
    fn test_verify_detached_ok() {
        let keypair = IdentityKeypair::generate();
        let msg = "payload under test";
        let sig = STANDARD.encode(keypair.sign(msg.as_bytes()));

        assert!(verify_detached(keypair.peer_id().as_str(), msg, &sig));
        assert!(!verify_detached(keypair.peer_id().as_str(), "other", &sig));
    }

    #[test]
    fn test_verify_detached_is_total() {
        let keypair = IdentityKeypair::generate();
        let msg = "abc";
        let sig = STANDARD.encode(keypair.sign(msg.as_bytes()));
        let id = keypair.peer_id();

        // Malformed inputs must return false, never panic or error.
        assert!(!verify_detached("", msg, &sig));
        assert!(!verify_detached("###invalid###", msg, &sig));
        assert!(!verify_detached(id.as_str(), msg, ""));
        assert!(!verify_detached(id.as_str(), msg, "###invalid###"));

        // Valid base64 of the wrong length
        let short_key = STANDARD.encode([0u8; 16]);
        assert!(!verify_detached(&short_key, msg, &sig));
        let short_sig = STANDARD.encode([0u8; 16]);
        assert!(!verify_detached(id.as_str(), msg, &short_sig));
    }
}
