//! Warden Crypto — second-factor and fingerprint primitives.
//!
//! Generates base32 one-time-passcode secrets, verifies RFC 6238 codes
//! across a three-window tolerance with replay protection backed by the
//! shared cache, and fingerprints certificate material.

pub mod fingerprint;
pub mod otp;
