use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::now_secs;

pub const SIGNATURE_HEADER: &str = "X-Redirect-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Redirect-Timestamp";

/// Signature and timestamp headers for one forwarded payload.
pub(crate) fn signature_headers(secret: &[u8], payload: &[u8]) -> [(&'static str, String); 2] {
    let timestamp = now_secs().to_string();
    let signature = compute_signature(secret, payload, &timestamp);
    [(SIGNATURE_HEADER, signature), (TIMESTAMP_HEADER, timestamp)]
}

fn mac_for(secret: &[u8], payload: &[u8], timestamp: &str) -> Hmac<Sha256> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(timestamp.as_bytes());
    mac.update(payload);
    mac
}

/// Hex HMAC-SHA256 over `timestamp || payload`.
pub fn compute_signature(secret: &[u8], payload: &[u8], timestamp: &str) -> String {
    hex::encode(mac_for(secret, payload, timestamp).finalize().into_bytes())
}

/// Receiver-side check of a forwarded payload.
pub fn verify_signature(secret: &[u8], payload: &[u8], timestamp: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    mac_for(secret, payload, timestamp).verify_slice(&signature).is_ok()
}
