//! Identity store - stable, append-only identity records
//!
//! Persists `identities.json` and `speaker_mapping.json` under
//! `memory/identities/`. Identities are never deleted; the speaker mapping
//! only gains entries. A `debug` identity exists out of the box so harnesses
//! can inject text without speaker identification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::domain::Identity;

pub const DEBUG_SPEAKER_ID: &str = "debug";

#[derive(Default, Serialize, Deserialize)]
struct IdentityFile {
    identities: HashMap<String, Identity>,
}

#[derive(Default)]
struct IdentityInner {
    identities: HashMap<String, Identity>,
    speaker_mapping: HashMap<String, String>,
}

pub struct IdentityStore {
    dir: PathBuf,
    inner: Mutex<IdentityInner>,
}

impl IdentityStore {
    /// Open the store under `dir` (typically `memory/identities/`),
    /// seeding the `debug` identity if absent
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mut inner = IdentityInner::default();

        if let Ok(content) = std::fs::read_to_string(dir.join("identities.json")) {
            match serde_json::from_str::<IdentityFile>(&content) {
                Ok(file) => inner.identities = file.identities,
                Err(e) => error!(error = %e, "failed to parse identities.json"),
            }
        }
        if let Ok(content) = std::fs::read_to_string(dir.join("speaker_mapping.json")) {
            match serde_json::from_str(&content) {
                Ok(mapping) => inner.speaker_mapping = mapping,
                Err(e) => error!(error = %e, "failed to parse speaker_mapping.json"),
            }
        }
        info!(
            dir = %dir.display(),
            identities = inner.identities.len(),
            "identity store loaded"
        );

        let store = Self {
            dir,
            inner: Mutex::new(inner),
        };
        store.ensure_identity(DEBUG_SPEAKER_ID, "Debug");
        store
    }

    fn save(&self, inner: &IdentityInner) {
        let _ = std::fs::create_dir_all(&self.dir);
        let file = IdentityFile {
            identities: inner.identities.clone(),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.dir.join("identities.json"), json) {
                    error!(error = %e, "failed to save identities.json");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize identities"),
        }
        match serde_json::to_string_pretty(&inner.speaker_mapping) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.dir.join("speaker_mapping.json"), json) {
                    error!(error = %e, "failed to save speaker_mapping.json");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize speaker mapping"),
        }
    }

    /// The identity mapped to a speaker, creating it if unknown
    pub fn ensure_identity(&self, speaker_id: &str, display_name: &str) -> Identity {
        let mut inner = self.inner.lock().expect("identity lock poisoned");
        if let Some(identity_id) = inner.speaker_mapping.get(speaker_id) {
            if let Some(identity) = inner.identities.get(identity_id) {
                return identity.clone();
            }
        }

        let identity = Identity::new(speaker_id, display_name);
        debug!(
            speaker_id,
            identity_id = %identity.identity_id,
            "identity created"
        );
        inner
            .speaker_mapping
            .insert(speaker_id.to_string(), identity.identity_id.clone());
        inner
            .identities
            .insert(identity.identity_id.clone(), identity.clone());
        self.save(&inner);
        identity
    }

    pub fn get(&self, identity_id: &str) -> Option<Identity> {
        self.inner
            .lock()
            .expect("identity lock poisoned")
            .identities
            .get(identity_id)
            .cloned()
    }

    pub fn by_speaker(&self, speaker_id: &str) -> Option<Identity> {
        let inner = self.inner.lock().expect("identity lock poisoned");
        let identity_id = inner.speaker_mapping.get(speaker_id)?;
        inner.identities.get(identity_id).cloned()
    }

    /// The fallback identity used when no speaker is resolved
    pub fn debug_identity(&self) -> Identity {
        self.by_speaker(DEBUG_SPEAKER_ID)
            .expect("debug identity seeded at open")
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("identity lock poisoned").identities.len()
    }
}
