//! AEAD sealing for line-framed messages.
//!
//! Wire packaging matches the frame body format:
//!
//! ```text
//! base64( nonce(12 bytes) || ciphertext+tag(16 bytes) )
//! ```
//!
//! AES-GCM with a fresh random 96-bit nonce per call. Keys of 16, 24, or
//! 32 bytes select AES-128/192/256 directly; any other length is
//! normalized to 32 bytes with SHA-256 before use.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::CryptoError;

/// Nonce length for AES-GCM (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

enum GcmCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl GcmCipher {
    fn for_key(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::InvalidArgument("empty key".into()));
        }
        let cipher = match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192),
            32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256),
            _ => {
                let digest = Sha256::digest(key);
                Aes256Gcm::new_from_slice(&digest).map(Self::Aes256)
            }
        };
        cipher.map_err(|e| CryptoError::Provider(format!("cipher init: {}", e)))
    }

    fn encrypt(&self, nonce: &[u8; NONCE_LEN], payload: Payload) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, payload),
            Self::Aes192(c) => c.encrypt(nonce, payload),
            Self::Aes256(c) => c.encrypt(nonce, payload),
        }
    }

    fn decrypt(&self, nonce: &[u8], payload: Payload) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, payload),
            Self::Aes192(c) => c.decrypt(nonce, payload),
            Self::Aes256(c) => c.decrypt(nonce, payload),
        }
    }
}

/// Seal `plaintext` under `key`, authenticating `aad`.
///
/// Returns `base64(nonce || ciphertext+tag)` ready for the wire.
pub fn seal_to_base64(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
    let cipher = GcmCipher::for_key(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encryption("aead seal failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Open a sealed frame body produced by [`seal_to_base64`].
///
/// Fails with a decryption error if the input is not valid base64, is
/// shorter than nonce+tag, or the tag does not authenticate under `aad`.
pub fn open_from_base64(key: &[u8], input: &str, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = GcmCipher::for_key(key)?;

    let all = STANDARD
        .decode(input)
        .map_err(|_| CryptoError::Decryption("invalid base64".into()))?;
    if all.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption("ciphertext too short".into()));
    }

    let (nonce, ciphertext) = all.split_at(NONCE_LEN);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Decryption("authentication failed".into()))
}
