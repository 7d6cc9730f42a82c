//! Snapshot store - per-identity memory, partitioned by memory token

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::new_prefixed_id;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("empty memory token")]
    EmptyToken,

    #[error("snapshot not found: {0}")]
    NotFound(String),
}

/// What a stored unit of memory is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// End-of-turn snapshot of a chat response
    Snapshot,
    /// Model-requested observation about the user
    Observation,
}

/// A unit of memory written at the end of a chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub memory_token: String,
    pub text: String,
    pub kind: SnapshotKind,
    pub created_at: DateTime<Utc>,
}

/// The memory module boundary consumed by the coordinator and tool bridge
///
/// Implementations must enforce per-token isolation: no snapshot stored under
/// token T may become retrievable via any accessor called with T' != T.
pub trait MemoryStore: Send + Sync {
    fn store_snapshot(&self, memory_token: &str, text: &str) -> Result<Snapshot, MemoryError>;

    fn store_observation(&self, memory_token: &str, text: &str) -> Result<Snapshot, MemoryError>;

    fn update_profile(&self, memory_token: &str, profile: Value) -> Result<(), MemoryError>;

    fn get_profile(&self, memory_token: &str) -> Option<Value>;

    /// Snapshots under the token whose text matches the query, newest first
    fn retrieve_snapshots(&self, memory_token: &str, query: &str, limit: usize) -> Vec<Snapshot>;

    fn get_snapshot(&self, memory_token: &str, snapshot_id: &str) -> Result<Snapshot, MemoryError>;

    /// Snapshots under the token created within [from, to], oldest first
    fn search_timeline(&self, memory_token: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Snapshot>;
}

#[derive(Default)]
struct TokenPartition {
    snapshots: Vec<Snapshot>,
    profile: Option<Value>,
}

/// Reference store: in-process, writes serialised per token by a single lock
pub struct InMemorySnapshotStore {
    partitions: Mutex<HashMap<String, TokenPartition>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
        }
    }

    fn write(&self, memory_token: &str, text: &str, kind: SnapshotKind) -> Result<Snapshot, MemoryError> {
        if memory_token.is_empty() {
            return Err(MemoryError::EmptyToken);
        }
        let snapshot = Snapshot {
            id: new_prefixed_id("snap_"),
            memory_token: memory_token.to_string(),
            text: text.to_string(),
            kind,
            created_at: Utc::now(),
        };
        let mut partitions = self.partitions.lock().expect("memory lock poisoned");
        partitions
            .entry(memory_token.to_string())
            .or_default()
            .snapshots
            .push(snapshot.clone());
        debug!(token = memory_token, id = %snapshot.id, ?kind, "snapshot stored");
        Ok(snapshot)
    }

    /// Every snapshot under a token, in insertion order (test support)
    pub fn all_for_token(&self, memory_token: &str) -> Vec<Snapshot> {
        self.partitions
            .lock()
            .expect("memory lock poisoned")
            .get(memory_token)
            .map(|p| p.snapshots.clone())
            .unwrap_or_default()
    }

    pub fn total_snapshots(&self) -> usize {
        self.partitions
            .lock()
            .expect("memory lock poisoned")
            .values()
            .map(|p| p.snapshots.len())
            .sum()
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore for InMemorySnapshotStore {
    fn store_snapshot(&self, memory_token: &str, text: &str) -> Result<Snapshot, MemoryError> {
        self.write(memory_token, text, SnapshotKind::Snapshot)
    }

    fn store_observation(&self, memory_token: &str, text: &str) -> Result<Snapshot, MemoryError> {
        self.write(memory_token, text, SnapshotKind::Observation)
    }

    fn update_profile(&self, memory_token: &str, profile: Value) -> Result<(), MemoryError> {
        if memory_token.is_empty() {
            return Err(MemoryError::EmptyToken);
        }
        let mut partitions = self.partitions.lock().expect("memory lock poisoned");
        partitions.entry(memory_token.to_string()).or_default().profile = Some(profile);
        Ok(())
    }

    fn get_profile(&self, memory_token: &str) -> Option<Value> {
        self.partitions
            .lock()
            .expect("memory lock poisoned")
            .get(memory_token)
            .and_then(|p| p.profile.clone())
    }

    fn retrieve_snapshots(&self, memory_token: &str, query: &str, limit: usize) -> Vec<Snapshot> {
        let query = query.to_lowercase();
        let partitions = self.partitions.lock().expect("memory lock poisoned");
        let Some(partition) = partitions.get(memory_token) else {
            return Vec::new();
        };
        let mut matches: Vec<Snapshot> = partition
            .snapshots
            .iter()
            .filter(|s| query.is_empty() || s.text.to_lowercase().contains(&query))
            .cloned()
            .collect();
        matches.reverse();
        matches.truncate(limit);
        matches
    }

    fn get_snapshot(&self, memory_token: &str, snapshot_id: &str) -> Result<Snapshot, MemoryError> {
        self.partitions
            .lock()
            .expect("memory lock poisoned")
            .get(memory_token)
            .and_then(|p| p.snapshots.iter().find(|s| s.id == snapshot_id).cloned())
            .ok_or_else(|| MemoryError::NotFound(snapshot_id.to_string()))
    }

    fn search_timeline(&self, memory_token: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Snapshot> {
        self.partitions
            .lock()
            .expect("memory lock poisoned")
            .get(memory_token)
            .map(|p| {
                p.snapshots
                    .iter()
                    .filter(|s| s.created_at >= from && s.created_at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
