//! SHA-256 fingerprints.
//!
//! Used to identify certificates in operator output and to version
//! the used-passcode cache key by the secret it was recorded against.

use sha2::{Digest, Sha256};
use warden_common::encoding::hex_encode;

/// Compute a SHA-256 fingerprint of arbitrary bytes (usually certificate DER).
///
/// Returns the fingerprint as a lowercase hex string.
pub fn fingerprint_sha256(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

/// Short fingerprint: the first `len` hex characters of [`fingerprint_sha256`].
pub fn short_fingerprint(data: &[u8], len: usize) -> String {
    let mut fp = fingerprint_sha256(data);
    fp.truncate(len);
    fp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let data = b"test certificate DER data";
        assert_eq!(fingerprint_sha256(data), fingerprint_sha256(data));
    }

    #[test]
    fn fingerprint_is_hex_string() {
        let fp = fingerprint_sha256(b"test certificate DER data");
        // SHA-256 produces 32 bytes = 64 hex chars
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_answer() {
        assert_eq!(
            fingerprint_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn short_fingerprint_is_prefix() {
        let full = fingerprint_sha256(b"cert A");
        let short = short_fingerprint(b"cert A", 12);
        assert_eq!(short.len(), 12);
        assert!(full.starts_with(&short));
        assert_ne!(short, short_fingerprint(b"cert B", 12));
    }
}
