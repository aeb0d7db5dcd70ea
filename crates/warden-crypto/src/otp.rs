//! One-time passcodes: secret generation, verification, replay protection.
//!
//! Codes are RFC 6238 TOTP with HMAC-SHA1, 6 digits, 30-second steps
//! (the authenticator-app default). A submitted code is accepted when it
//! matches the previous, current or next step, and only once: accepted
//! codes are recorded in the shared cache for [`REPLAY_WINDOW_SECS`].

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};
use warden_common::cache::{CacheError, KvStore};
use zeroize::Zeroize;

use crate::fingerprint::short_fingerprint;

/// Length of a stored secret, in base32 characters (80 bits).
pub const OTP_SECRET_LEN: usize = 16;

/// Seconds per passcode window.
pub const TIME_STEP: u64 = 30;

/// How long an accepted code stays in the used-passcode record.
pub const REPLAY_WINDOW_SECS: u64 = 120;

const CODE_DIGITS: usize = 6;

/// Bytes of OS randomness fed into the secret derivation.
const SEED_LEN: usize = 8192;

/// SHA-512 applications: one over the seed, six over the previous digest.
const HASH_ROUNDS: usize = 7;

/// Hex characters of the secret fingerprint used in replay keys.
const REPLAY_KEY_FP_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("invalid otp secret: {0}")]
    InvalidSecret(String),
}

/// Generate a fresh base32 secret of [`OTP_SECRET_LEN`] characters.
///
/// An 8 KiB sample from the OS CSPRNG is stretched through seven
/// sequential SHA-512 rounds; the final digest is base32-encoded and
/// truncated.
pub fn generate_secret() -> String {
    let mut seed = vec![0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);

    let mut digest = Sha512::digest(&seed);
    seed.zeroize();
    for _ in 1..HASH_ROUNDS {
        digest = Sha512::digest(digest);
    }

    let mut encoded = Secret::Raw(digest.to_vec()).to_encoded().to_string();
    digest.as_mut_slice().zeroize();
    encoded.truncate(OTP_SECRET_LEN);
    encoded
}

/// Decode a stored base32 secret into key bytes.
///
/// Lowercase input and `=` padding are both accepted.
pub fn decode_secret(secret: &str) -> Result<Vec<u8>, OtpError> {
    let normalized = secret.trim().trim_end_matches('=').to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(OtpError::InvalidSecret("empty secret".into()));
    }
    Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| OtpError::InvalidSecret(format!("{e:?}")))
}

/// Compute the passcode for the window containing `unix_time`.
pub fn passcode_at(secret: &str, unix_time: u64) -> Result<String, OtpError> {
    let key = decode_secret(secret)?;
    Ok(build_totp(key).generate(unix_time))
}

/// Passcodes for the previous, current and next window around `now`.
pub fn candidate_codes(secret: &str, now: u64) -> Result<[String; 3], OtpError> {
    let totp = build_totp(decode_secret(secret)?);
    Ok([
        totp.generate(now.saturating_sub(TIME_STEP)),
        totp.generate(now),
        totp.generate(now + TIME_STEP),
    ])
}

/// Cache key of the used-passcode record for one identity.
///
/// The key carries a fingerprint of the secret, so regenerating the
/// secret starts a fresh record instead of inheriting stale entries.
pub fn replay_key(identity_id: &str, secret: &str) -> String {
    format!(
        "otp-{identity_id}-{}",
        short_fingerprint(secret.as_bytes(), REPLAY_KEY_FP_LEN)
    )
}

/// Verify `code` against `secret` at the current wall-clock time.
pub fn verify_code(
    store: &dyn KvStore,
    replay_key: &str,
    secret: &str,
    code: &str,
) -> Result<bool, CacheError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    verify_code_at(store, replay_key, secret, code, now)
}

/// Verify `code` against `secret` as of `now` (UNIX seconds).
///
/// Returns `Ok(false)` for a wrong, malformed or replayed code and for
/// an undecodable secret. Errors only come from the cache backend.
pub fn verify_code_at(
    store: &dyn KvStore,
    replay_key: &str,
    secret: &str,
    code: &str,
    now: u64,
) -> Result<bool, CacheError> {
    let code = code.trim();
    if code.len() != CODE_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }

    let candidates = match candidate_codes(secret, now) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "Stored otp secret cannot be decoded");
            return Ok(false);
        }
    };

    // Fold every comparison so timing does not reveal which window matched.
    let matched = candidates
        .iter()
        .fold(subtle::Choice::from(0), |acc, c| {
            acc | c.as_bytes().ct_eq(code.as_bytes())
        });
    if !bool::from(matched) {
        return Ok(false);
    }

    consume_code(store, replay_key, code, now)
}

/// Prune stale entries, then claim the code.
///
/// The record maps each used code to the second it was accepted. The
/// claim is one insert-if-absent on the code's own field, so of several
/// concurrent verifiers exactly one wins.
fn consume_code(
    store: &dyn KvStore,
    replay_key: &str,
    code: &str,
    now: u64,
) -> Result<bool, CacheError> {
    for (used_code, auth_time) in store.dict_get_all(replay_key)? {
        let fresh = auth_time
            .parse::<u64>()
            .map(|t| now.saturating_sub(t) <= REPLAY_WINDOW_SECS)
            .unwrap_or(false);
        if !fresh {
            // Conditional, so a prune racing a fresh claim of the same code
            // cannot drop that claim.
            store.dict_remove_if_eq(replay_key, &used_code, &auth_time)?;
        }
    }

    if store.dict_set_if_absent(replay_key, code, &now.to_string())? {
        return Ok(true);
    }
    tracing::info!(replay_key, "Rejected replayed one-time passcode");
    Ok(false)
}

/// Build the `otpauth://` URI for authenticator apps.
pub fn build_totp_uri(secret: &str, issuer: &str, account: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        issuer, account, secret, issuer, CODE_DIGITS, TIME_STEP
    )
}

/// Render the provisioning URI as a Unicode QR code for terminal display.
pub fn qr_code_unicode(secret: &str, issuer: &str, account: &str) -> String {
    use qrcode::render::unicode;
    use qrcode::QrCode;

    let uri = build_totp_uri(secret, issuer, account);

    match QrCode::new(uri.as_bytes()) {
        Ok(code) => code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build(),
        Err(e) => {
            tracing::warn!(error = %e, "QR code generation failed");
            format!("(QR code unavailable: {e})")
        }
    }
}

/// 80-bit secrets are below the RFC 4226 recommendation that
/// `TOTP::new` enforces, hence the unchecked constructor.
fn build_totp(key: Vec<u8>) -> TOTP {
    TOTP::new_unchecked(Algorithm::SHA1, CODE_DIGITS, 1, TIME_STEP, key)
}
