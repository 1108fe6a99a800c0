use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An upstream API credential.
///
/// The token is opaque. `Debug` and `Display` only ever print the masked
/// form, so a credential can be handed to a log macro safely.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building the outbound request only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First 10 and last 4 characters of the token.
    ///
    /// Tokens too short to hide anything that way show only their first
    /// four characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 14 {
            let head: String = chars.iter().take(4).collect();
            return format!("{}...", head);
        }
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }

    /// Stable SHA-256 fingerprint used in store key names.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Unique identifier for a redirect target.
///
/// Generated at registration and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a redirect target. Removal deletes the record, so only the
/// live state is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Active,
}

impl Default for TargetStatus {
    fn default() -> Self {
        TargetStatus::Active
    }
}

/// Most recent delivery error of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub at_secs: u64,
}

/// Operator-configured forwarding destination, with its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub id: TargetId,
    pub url: String,
    pub description: String,
    pub created_at_secs: u64,
    pub status: TargetStatus,
    /// Optional secret for HMAC signing of forwarded payloads.
    #[serde(default, skip_serializing)]
    pub secret: Option<Vec<u8>>,
    pub success_count: u64,
    pub error_count: u64,
    pub last_success_secs: Option<u64>,
    pub last_error: Option<LastError>,
}

impl RedirectTarget {
    pub fn is_active(&self) -> bool {
        self.status == TargetStatus::Active
    }
}

/// Stored form of a target's configuration. Counters live in a separate
/// hash so they can be bumped atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version")]
pub(crate) enum StoredTarget {
    #[serde(rename = "1")]
    V1 {
        id: TargetId,
        url: String,
        description: String,
        created_at_secs: u64,
        #[serde(default)]
        status: TargetStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_hex: Option<String>,
    },
}

/// A payload that could not be delivered to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub enqueued_at_secs: u64,
    /// Exact inbound payload, forwarded byte-for-byte on replay.
    pub payload: Vec<u8>,
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version")]
pub(crate) enum StoredFailedDelivery {
    #[serde(rename = "1")]
    V1 {
        enqueued_at_secs: u64,
        payload: Vec<u8>,
        retries: u32,
    },
}

impl From<&FailedDelivery> for StoredFailedDelivery {
    fn from(record: &FailedDelivery) -> Self {
        StoredFailedDelivery::V1 {
            enqueued_at_secs: record.enqueued_at_secs,
            payload: record.payload.clone(),
            retries: record.retries,
        }
    }
}

impl From<StoredFailedDelivery> for FailedDelivery {
    fn from(stored: StoredFailedDelivery) -> Self {
        match stored {
            StoredFailedDelivery::V1 { enqueued_at_secs, payload, retries } => FailedDelivery {
                enqueued_at_secs,
                payload,
                retries,
            },
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_long_tokens() {
        let key = Credential::new("gsk_abcdefghijklmnopqrstuvwxyz");
        assert_eq!(key.masked(), "gsk_abcdef...wxyz");
        assert_eq!(format!("{}", key), "gsk_abcdef...wxyz");
        assert!(!format!("{:?}", key).contains("klmnop"));
    }

    #[test]
    fn masks_short_tokens_without_leaking_tail() {
        assert_eq!(Credential::new("gsk_short").masked(), "gsk_...");
        assert_eq!(Credential::new("ab").masked(), "ab...");
    }

    #[test]
    fn fingerprint_is_stable_and_hides_token() {
        let key = Credential::new("gsk_secret_token_value");
        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_eq!(key.fingerprint().len(), 64);
        assert!(!key.fingerprint().contains("secret"));
    }

    #[test]
    fn target_ids_are_unique() {
        assert_ne!(TargetId::generate(), TargetId::generate());
    }

    #[test]
    fn failed_delivery_envelope_is_versioned() {
        let record = FailedDelivery {
            enqueued_at_secs: 7,
            payload: br#"{"x":1}"#.to_vec(),
            retries: 2,
        };
        let json = serde_json::to_string(&StoredFailedDelivery::from(&record)).unwrap();
        assert!(json.contains(r#""version":"1""#));
        let back: StoredFailedDelivery = serde_json::from_str(&json).unwrap();
        assert_eq!(FailedDelivery::from(back), record);
    }
}
