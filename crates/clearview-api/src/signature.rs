//! Webhook signature verification.
//!
//! The platform signs each delivery with a header of the form
//! `t=<unix-seconds>,v0=<hex hmac-sha256>`, where the MAC covers the bytes
//! `"{t}.{raw body}"`. Verification always runs over the body exactly as
//! received; re-serialized JSON will not verify.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 output length in bytes.
const MAC_LEN: usize = 32;

/// Why a delivery was rejected. All variants map to 401 at intake.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,

    #[error("signature mismatch")]
    InvalidSignature,
}

/// Parsed `t` and `v0` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signature: String,
}

impl SignatureHeader {
    /// Parse `key=value` pairs. Unknown keys are ignored; the first `t` and
    /// `v0` win.
    pub fn parse(value: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signature = None;
        for pair in value.split(',') {
            let Some((key, val)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                "t" if timestamp.is_none() => timestamp = Some(val.trim()),
                "v0" if signature.is_none() => signature = Some(val.trim()),
                _ => {}
            }
        }

        let (Some(t), Some(v0)) = (timestamp, signature) else {
            return Err(SignatureError::MalformedHeader);
        };
        let timestamp = t
            .parse::<i64>()
            .map_err(|_| SignatureError::MalformedHeader)?;

        Ok(Self {
            timestamp,
            signature: v0.to_string(),
        })
    }
}

fn mac_for(secret: &str, timestamp: i64, raw_body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Ok(mac)
}

/// Verify a delivery.
///
/// Freshness is checked before the MAC so replays fail without hashing.
/// Timestamps in the future are accepted.
pub fn verify(
    raw_body: &[u8],
    header_value: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<SignatureHeader, SignatureError> {
    let header = SignatureHeader::parse(header_value)?;

    if now - header.timestamp > tolerance_secs {
        return Err(SignatureError::StaleTimestamp);
    }

    let received =
        hex::decode(&header.signature).map_err(|_| SignatureError::InvalidSignature)?;
    let mac = mac_for(secret, header.timestamp, raw_body)?;

    // Length check first; verify_slice is constant-time over equal lengths.
    if received.len() != MAC_LEN {
        return Err(SignatureError::InvalidSignature);
    }
    mac.verify_slice(&received)
        .map_err(|_| SignatureError::InvalidSignature)?;

    Ok(header)
}

/// Build a header value for `raw_body` signed at `timestamp`.
pub fn sign(raw_body: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let digest = mac_for(secret, timestamp, raw_body)?.finalize().into_bytes();
    Ok(format!("t={},v0={}", timestamp, hex::encode(digest)))
}
