//! Cryptographic primitives for Tether.
//!
//! This crate provides:
//! - Ed25519 identity keys and base64 peer ids
//! - A signed ephemeral X25519 handshake with forward secrecy
//! - HKDF-SHA256 session key derivation
//! - AES-256-GCM sealing/opening of line-framed messages
//!
//! # Design
//!
//! Both peers know each other's long-term Ed25519 key out of band. Each
//! side signs a fresh X25519 ephemeral public key together with the
//! identity it expects to be talking to; the shared secret is fed through
//! HKDF with an info string that canonically orders both identities, so
//! initiator and responder derive the same 32-byte session key.

#![forbid(unsafe_code)]

pub mod aead;
pub mod handshake;
pub mod identity;
pub mod kdf;

pub use handshake::{HandshakeError, SessionKey};
pub use identity::{IdentityKeypair, PeerId};

use thiserror::Error;

/// Errors from the stateless primitives.
///
/// `Provider` is reserved for genuine backend failure and is never raised
/// for malformed attacker-controlled input.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("crypto provider failure: {0}")]
    Provider(String),
}
