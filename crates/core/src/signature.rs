//! HMAC-SHA256 verification of raw webhook bodies.
//!
//! Signatures are lowercase or uppercase hex, optionally prefixed with
//! `sha256=`. Comparison goes through [`subtle`] so the time taken does not
//! depend on where a mismatch occurs, including a length mismatch.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const DIGEST_LEN: usize = 32;
const PREFIX: &str = "sha256=";

/// Why a signature was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is missing or empty")]
    MissingSignature,
    #[error("no signing secret is configured")]
    MissingSecret,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

impl SignatureError {
    /// Label used for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::MissingSecret => "missing_secret",
            Self::Malformed => "malformed",
            Self::Mismatch => "mismatch",
        }
    }
}

/// Returns `true` only when `provided` is the HMAC-SHA256 of `raw_body` under `secret`.
///
/// Absent or empty inputs fail closed. Never panics.
pub fn verify(raw_body: &[u8], provided: Option<&str>, secret: Option<&[u8]>) -> bool {
    check(raw_body, provided, secret).is_ok()
}

/// Same as [`verify`] but reports the rejection reason.
pub fn check(
    raw_body: &[u8],
    provided: Option<&str>,
    secret: Option<&[u8]>,
) -> Result<(), SignatureError> {
    let provided = provided
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::MissingSignature)?;
    let secret = secret
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::MissingSecret)?;

    let hex_part = provided.strip_prefix(PREFIX).unwrap_or(provided);
    let provided_bytes = hex::decode(hex_part).map_err(|_| SignatureError::Malformed)?;

    let expected = digest(secret, raw_body).ok_or(SignatureError::Mismatch)?;

    // Fixed-size candidate so the byte comparison always covers DIGEST_LEN bytes.
    let mut candidate = [0u8; DIGEST_LEN];
    let copy_len = provided_bytes.len().min(DIGEST_LEN);
    candidate[..copy_len].copy_from_slice(&provided_bytes[..copy_len]);

    let length_ok: Choice = (provided_bytes.len() as u64).ct_eq(&(DIGEST_LEN as u64));
    let bytes_ok: Choice = expected[..].ct_eq(&candidate[..]);

    if bool::from(length_ok & bytes_ok) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`, as senders are expected to compute it.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    match digest(secret, body) {
        Some(bytes) => hex::encode(bytes),
        None => String::new(),
    }
}

fn digest(secret: &[u8], body: &[u8]) -> Option<[u8; DIGEST_LEN]> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Some(out)
}
