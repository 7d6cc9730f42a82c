//! Working Context - process-wide keyed store for cross-module data
//!
//! Holds two kinds of data: a flat ordered key/value map with typed accessors
//! for the reserved keys, and named accumulation contexts that collect
//! samples until a threshold is crossed. Crossing the threshold dispatches to
//! the decision handler registered for the context's type tag; this is how
//! speaker identification drives identity creation without the input layer
//! knowing about identity policy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::Identity;

/// Reserved keys
pub const KEY_CURRENT_IDENTITY_ID: &str = "current_identity_id";
pub const KEY_CURRENT_IDENTITY: &str = "current_identity";
pub const KEY_CURRENT_CYCLE_INDEX: &str = "current_cycle_index";
pub const KEY_DECLARED_IDENTITY_ID: &str = "declared_identity_id";

/// Decision produced by an accumulation handler when a threshold is crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationDecision {
    /// Resolve the context; the caller creates an identity for its samples
    CreateIdentity,
    /// Keep collecting samples
    ContinueAccumulation,
    /// Discard collected samples and start over
    ResetAccumulation,
}

/// A typed bucket of samples awaiting a decision
#[derive(Debug, Clone)]
pub struct AccumulationContext {
    pub name: String,
    pub type_tag: String,
    pub samples: Vec<Value>,
    pub threshold: usize,
    pub metadata: Value,
    pub resolved: bool,
}

type DecisionHandler = Arc<dyn Fn(&AccumulationContext) -> AccumulationDecision + Send + Sync>;

/// Process-wide hub for cross-component state
///
/// Mutations are serialised by a single lock per map; no lock is held while a
/// decision handler runs.
pub struct WorkingContext {
    data: Mutex<BTreeMap<String, Value>>,
    accumulators: Mutex<HashMap<String, AccumulationContext>>,
    deciders: RwLock<HashMap<String, DecisionHandler>>,
}

impl WorkingContext {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            accumulators: Mutex::new(HashMap::new()),
            deciders: RwLock::new(HashMap::new()),
        }
    }

    // === Flat key/value map ===

    pub fn set(&self, key: &str, value: Value) {
        self.data
            .lock()
            .expect("working context lock poisoned")
            .insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .expect("working context lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .expect("working context lock poisoned")
            .remove(key)
    }

    // === Typed accessors for reserved keys ===

    pub fn cycle_index(&self) -> u64 {
        self.get(KEY_CURRENT_CYCLE_INDEX)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    pub fn set_cycle_index(&self, index: u64) {
        self.set(KEY_CURRENT_CYCLE_INDEX, Value::from(index));
    }

    /// Increment the cycle index and return the new value
    pub fn increment_cycle_index(&self) -> u64 {
        let mut data = self.data.lock().expect("working context lock poisoned");
        let next = data
            .get(KEY_CURRENT_CYCLE_INDEX)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        data.insert(KEY_CURRENT_CYCLE_INDEX.to_string(), Value::from(next));
        next
    }

    pub fn set_current_identity(&self, identity: &Identity) {
        let descriptor = serde_json::to_value(identity).expect("identity serializes");
        let mut data = self.data.lock().expect("working context lock poisoned");
        data.insert(
            KEY_CURRENT_IDENTITY_ID.to_string(),
            Value::from(identity.identity_id.clone()),
        );
        data.insert(KEY_CURRENT_IDENTITY.to_string(), descriptor);
    }

    /// Full descriptor of the current identity, validated on read
    pub fn current_identity(&self) -> Option<Identity> {
        let value = self.get(KEY_CURRENT_IDENTITY)?;
        match serde_json::from_value(value) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "current_identity payload malformed; failing closed");
                None
            }
        }
    }

    pub fn current_identity_id(&self) -> Option<String> {
        self.get(KEY_CURRENT_IDENTITY_ID)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn declared_identity_id(&self) -> Option<String> {
        self.get(KEY_DECLARED_IDENTITY_ID)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set_declared_identity_id(&self, identity_id: Option<&str>) {
        match identity_id {
            Some(id) => self.set(KEY_DECLARED_IDENTITY_ID, Value::from(id)),
            None => {
                self.remove(KEY_DECLARED_IDENTITY_ID);
            }
        }
    }

    // === Accumulation contexts ===

    /// Register a decision handler for a type tag
    pub fn register_decider(
        &self,
        type_tag: &str,
        handler: impl Fn(&AccumulationContext) -> AccumulationDecision + Send + Sync + 'static,
    ) {
        self.deciders
            .write()
            .expect("decider lock poisoned")
            .insert(type_tag.to_string(), Arc::new(handler));
    }

    /// Create an accumulation context; replaces an existing one of the same name
    pub fn register_accumulator(&self, name: &str, type_tag: &str, threshold: usize, metadata: Value) {
        debug!(name, type_tag, threshold, "register_accumulator");
        self.accumulators
            .lock()
            .expect("accumulator lock poisoned")
            .insert(
                name.to_string(),
                AccumulationContext {
                    name: name.to_string(),
                    type_tag: type_tag.to_string(),
                    samples: Vec::new(),
                    threshold,
                    metadata,
                    resolved: false,
                },
            );
    }

    /// Add a sample; returns the decision applied if the threshold was crossed
    ///
    /// Reaching the threshold dispatches to the handler registered for the
    /// context's type tag. `CreateIdentity` flips the context to resolved;
    /// `ResetAccumulation` clears the samples; `ContinueAccumulation` leaves
    /// it collecting.
    pub fn add_sample(&self, name: &str, sample: Value) -> Option<AccumulationDecision> {
        let snapshot = {
            let mut accumulators = self.accumulators.lock().expect("accumulator lock poisoned");
            let ctx = accumulators.get_mut(name)?;
            if ctx.resolved {
                debug!(name, "add_sample: context already resolved, ignoring");
                return None;
            }
            ctx.samples.push(sample);
            if ctx.samples.len() < ctx.threshold {
                return None;
            }
            ctx.clone()
        };

        let decider = self
            .deciders
            .read()
            .expect("decider lock poisoned")
            .get(&snapshot.type_tag)
            .cloned();
        let Some(decider) = decider else {
            warn!(
                type_tag = %snapshot.type_tag,
                "threshold crossed but no decision handler registered"
            );
            return None;
        };

        let decision = decider(&snapshot);
        debug!(name, ?decision, samples = snapshot.samples.len(), "accumulation decision");

        let mut accumulators = self.accumulators.lock().expect("accumulator lock poisoned");
        if let Some(ctx) = accumulators.get_mut(name) {
            match decision {
                AccumulationDecision::CreateIdentity => ctx.resolved = true,
                AccumulationDecision::ResetAccumulation => ctx.samples.clear(),
                AccumulationDecision::ContinueAccumulation => {}
            }
        }
        Some(decision)
    }

    pub fn accumulator(&self, name: &str) -> Option<AccumulationContext> {
        self.accumulators
            .lock()
            .expect("accumulator lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.accumulator(name).map(|c| c.resolved).unwrap_or(false)
    }
}

impl Default for WorkingContext {
    fn default() -> Self {
        Self::new()
    }
}
