//! Slack request signature verification.
//!
//! Slack signs each webhook delivery: `X-Slack-Signature: v0=<hex HMAC-SHA256>`
//! over the base string `v0:{timestamp}:{raw body}`, with the timestamp in
//! `X-Slack-Request-Timestamp`. Verification is byte-sensitive, so handlers must
//! pass the body exactly as received. Requests older (or further in the future)
//! than the replay window are rejected regardless of signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature version prefix Slack puts on both the header and the base string.
const SIGNATURE_VERSION: &str = "v0";

/// Maximum allowed distance between now and the claimed timestamp, in seconds.
/// Inclusive: a request exactly this old is still accepted.
const REPLAY_WINDOW_SECS: i64 = 300;

/// Verifies webhook deliveries against the configured signing secret.
///
/// Fails closed: no secret, malformed input, or an internal HMAC error all
/// yield `false`. Never panics.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// True when a signing secret is configured.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `signature` (format `v0=<hex>`) over `body` with the claimed
    /// `timestamp` (decimal Unix seconds) against the current clock.
    pub fn verify(&self, body: &[u8], signature: &str, timestamp: &str) -> bool {
        self.verify_at(body, signature, timestamp, chrono::Utc::now().timestamp())
    }

    /// Same as [`verify`](Self::verify) with an explicit "now", so the replay
    /// window is testable without sleeping.
    fn verify_at(&self, body: &[u8], signature: &str, timestamp: &str, now: i64) -> bool {
        let Some(ref secret) = self.secret else {
            // Operational misconfiguration, not an attack: verification must never be skipped.
            log::error!("slack signing secret not configured; rejecting webhook");
            return false;
        };

        let ts: i64 = match timestamp.trim().parse() {
            Ok(t) => t,
            Err(_) => {
                log::debug!("webhook rejected: non-numeric timestamp {:?}", timestamp);
                return false;
            }
        };
        // abs_diff instead of subtraction: extreme attacker-supplied timestamps
        // (near i64::MIN/MAX) must reject, not overflow.
        if now.abs_diff(ts) > REPLAY_WINDOW_SECS as u64 {
            log::warn!(
                "webhook rejected: timestamp {} outside replay window (now {})",
                ts,
                now
            );
            return false;
        }

        let claimed_hex = match signature.strip_prefix(&format!("{}=", SIGNATURE_VERSION)) {
            Some(h) => h,
            None => {
                log::debug!("webhook rejected: signature missing {}= prefix", SIGNATURE_VERSION);
                return false;
            }
        };
        let claimed = match hex::decode(claimed_hex) {
            Ok(b) => b,
            Err(_) => {
                log::debug!("webhook rejected: signature is not valid hex");
                return false;
            }
        };

        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                log::error!("failed to create HMAC from signing secret");
                return false;
            }
        };
        mac.update(format!("{}:{}:", SIGNATURE_VERSION, timestamp.trim()).as_bytes());
        mac.update(body);

        // verify_slice is a constant-time comparison; a mismatch position never
        // affects timing. Wrong-length input fails without comparing contents.
        if mac.verify_slice(&claimed).is_err() {
            log::warn!("webhook rejected: signature mismatch");
            return false;
        }
        true
    }
}

/// Compute the `v0=<hex>` signature for a body and timestamp. Used by the CLI
/// harness and tests to produce valid fixtures.
pub fn sign(secret: &str, body: &[u8], timestamp: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail in practice.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(format!("{}:{}:", SIGNATURE_VERSION, timestamp).as_bytes());
    mac.update(body);
    format!("{}={}", SIGNATURE_VERSION, hex::encode(mac.finalize().into_bytes()))
}
