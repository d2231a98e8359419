//! HKDF-SHA256 key derivation (RFC 5869).

use hkdf::Hkdf;
use sha2::Sha256;

use crate::CryptoError;

/// Maximum output length for HKDF-SHA256 expand: 255 * HashLen.
pub const MAX_OKM_LEN: usize = 255 * 32;

/// Extract-then-expand with SHA-256.
///
/// `salt` defaults to 32 zero bytes when absent, per RFC 5869.
/// `length` must be in `(0, 255*32]`.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    if length == 0 || length > MAX_OKM_LEN {
        return Err(CryptoError::InvalidArgument(format!(
            "hkdf output length must be in 1..={}, got {}",
            MAX_OKM_LEN, length
        )));
    }

    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidArgument("hkdf output length too large".into()))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 5869, appendix A.1 (basic test case with SHA-256).
    #[test]
    fn test_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let okm = hkdf_sha256(&ikm, Some(&salt), &info, 42).unwrap();

        let expected = [
            0x3c, 0xb2, 0x5f, 0x25, 0xfa, 0xac, 0xd5, 0x7a, 0x90, 0x43, 0x4f, 0x64, 0xd0, 0x36,
            0x2f, 0x2a, 0x2d, 0x2d, 0x0a, 0x90, 0xcf, 0x1a, 0x5a, 0x4c, 0x5d, 0xb0, 0x2d, 0x56,
            0xec, 0xc4, 0xc5, 0xbf, 0x34, 0x00, 0x72, 0x08, 0xd5, 0xb8, 0x87, 0x18, 0x58, 0x65,
        ];
        assert_eq!(okm, expected);
    }

    #[test]
    fn test_deterministic() {
        let a = hkdf_sha256(b"secret", None, b"info", 32).unwrap();
        let b = hkdf_sha256(b"secret", None, b"info", 32).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_info_separates_outputs() {
        let a = hkdf_sha256(b"secret", None, b"context-a", 32).unwrap();
        let b = hkdf_sha256(b"secret", None, b"context-b", 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_absent_salt_is_zero_salt() {
        let zeros = [0u8; 32];
        let a = hkdf_sha256(b"secret", None, b"info", 32).unwrap();
        let b = hkdf_sha256(b"secret", Some(&zeros), b"info", 32).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_length_bounds() {
        assert!(hkdf_sha256(b"ikm", None, b"info", 0).is_err());
        assert!(hkdf_sha256(b"ikm", None, b"info", MAX_OKM_LEN + 1).is_err());
        assert_eq!(
            hkdf_sha256(b"ikm", None, b"info", MAX_OKM_LEN).unwrap().len(),
            MAX_OKM_LEN
        );
    }
}
