//! HMAC-SHA256 signatures for webhook ownership verification.
//!
//! The server signs the webhook URL with the shared secret; the target must
//! echo the hex signature in its `X-Webhook-Signature` response header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes `hex(HMAC-SHA256(secret, url))`.
#[must_use]
pub fn sign_url(secret: &str, url: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(url.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a hex signature in constant time.
#[must_use]
pub fn verify_signature(secret: &str, url: &str, signature: &str) -> bool {
    let Ok(raw) = hex::decode(signature) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(url.as_bytes());
    mac.verify_slice(&raw).is_ok()
}
