//! Identity descriptor
//!
//! Each identity carries an opaque `memory_token` - the key on which stored
//! snapshots are partitioned. Retrievals and writes must include it; the
//! snapshot store enforces per-token isolation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub identity_id: String,
    pub display_name: String,
    pub speaker_id: String,
    pub memory_token: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(speaker_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let speaker_id = speaker_id.into();
        Self {
            identity_id: super::new_prefixed_id("id_"),
            display_name: display_name.into(),
            speaker_id,
            memory_token: super::new_prefixed_id("mem_"),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_unique_per_identity() {
        let a = Identity::new("spk_1", "Alice");
        let b = Identity::new("spk_2", "Bob");
        assert_ne!(a.memory_token, b.memory_token);
        assert!(a.memory_token.starts_with("mem_"));
        assert!(a.identity_id.starts_with("id_"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let identity = Identity::new("spk_9", "Debug");
        let json = serde_json::to_string(&identity).unwrap();
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
    }
}
