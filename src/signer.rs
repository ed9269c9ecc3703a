//! Signatures for dingtalk robots running in signed security mode.
//!
//! The robot expects `timestamp` and `sign` query parameters where `sign` is
//! the url encoded base64 of `HMAC-SHA256(secret, "{timestamp}\n{secret}")`.
//! The receiver rejects timestamps that are too far off its own clock, so a
//! signature has to be computed for every request.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// timestamp and signature ready to be appended to the webhook url
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// milliseconds since the unix epoch as decimal string
    pub timestamp: String,
    /// url encoded base64 hmac
    pub sign: String,
}

/// Signs `now_millis` with `secret`.
///
/// # Arguments
///
/// * `secret` - the robot secret
///
/// * `now_millis` - current time in milliseconds since the unix epoch
pub fn sign(secret: &str, now_millis: i64) -> Signature {
    let timestamp = now_millis.to_string();
    let string_to_sign = format!("{timestamp}\n{secret}");

    // hmac accepts keys of any length
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac takes keys of any size");
    mac.update(string_to_sign.as_bytes());

    let encoded = STANDARD.encode(mac.finalize().into_bytes());
    let sign = form_urlencoded::byte_serialize(encoded.as_bytes()).collect();

    Signature { timestamp, sign }
}
