//! Capability module registry
//!
//! The capability modules (`stt, nlp, llm, mem, tts, sys, ui, ani, mov`) are
//! external collaborators registered by name. The registry tracks which are
//! loaded; SLEEP unloads the heavy ones and wake reloads them without a
//! process restart - the module handle is parked, not dropped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::llm::Reasoner;

/// Canonical module names
pub const MODULE_NAMES: [&str; 9] = ["stt", "nlp", "llm", "mem", "tts", "sys", "ui", "ani", "mov"];

/// Modules unloaded on SLEEP
pub const HEAVY_MODULES: [&str; 3] = ["stt", "llm", "tts"];

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {0} is not registered")]
    NotRegistered(&'static str),

    #[error("module {0} is unloaded")]
    Unloaded(&'static str),

    #[error("module failure: {0}")]
    Failed(String),
}

/// Text captured by the speech-input module
#[derive(Debug, Clone)]
pub struct CapturedSpeech {
    pub text: String,
    /// Speaker id from the voice front-end, when identification ran
    pub speaker_id: Option<String>,
}

/// Speech-to-text boundary
#[async_trait]
pub trait SpeechInput: Send + Sync {
    /// Capture one utterance; `None` when nothing was heard this cycle
    async fn capture(&self) -> Result<Option<CapturedSpeech>, ModuleError>;
}

/// Text-to-speech boundary; receives pre-chunked text
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn synthesize(&self, chunk: &str) -> Result<(), ModuleError>;
}

/// UI sink; thread-affine rendering happens behind this seam
pub trait UiSink: Send + Sync {
    fn show_subtitle(&self, text: &str);
    fn show_error_indicator(&self);
}

struct Slot<T: ?Sized> {
    module: Option<Arc<T>>,
    loaded: bool,
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self {
            module: None,
            loaded: false,
        }
    }
}

impl<T: ?Sized> Slot<T> {
    fn active(&self) -> Option<Arc<T>> {
        if self.loaded { self.module.clone() } else { None }
    }
}

/// Registry of the configured capability modules
pub struct ModuleRegistry {
    stt: RwLock<Slot<dyn SpeechInput>>,
    tts: RwLock<Slot<dyn SpeechOutput>>,
    reasoner: RwLock<Slot<dyn Reasoner>>,
    ui: RwLock<Slot<dyn UiSink>>,
    /// Presence flags for modules the core only needs to know exist
    flags: RwLock<HashMap<String, bool>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            stt: RwLock::new(Slot::default()),
            tts: RwLock::new(Slot::default()),
            reasoner: RwLock::new(Slot::default()),
            ui: RwLock::new(Slot::default()),
            flags: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_stt(&self, module: Arc<dyn SpeechInput>) {
        info!("module registered: stt");
        let mut slot = self.stt.write().expect("registry lock poisoned");
        slot.module = Some(module);
        slot.loaded = true;
    }

    pub fn register_tts(&self, module: Arc<dyn SpeechOutput>) {
        info!("module registered: tts");
        let mut slot = self.tts.write().expect("registry lock poisoned");
        slot.module = Some(module);
        slot.loaded = true;
    }

    pub fn register_reasoner(&self, module: Arc<dyn Reasoner>) {
        info!("module registered: llm");
        let mut slot = self.reasoner.write().expect("registry lock poisoned");
        slot.module = Some(module);
        slot.loaded = true;
    }

    pub fn register_ui(&self, module: Arc<dyn UiSink>) {
        info!("module registered: ui");
        let mut slot = self.ui.write().expect("registry lock poisoned");
        slot.module = Some(module);
        slot.loaded = true;
    }

    /// Mark a named module present without a typed handle (nlp, sys, ani, mov)
    pub fn register_flag(&self, name: &str) {
        self.flags
            .write()
            .expect("registry lock poisoned")
            .insert(name.to_string(), true);
    }

    pub fn stt(&self) -> Option<Arc<dyn SpeechInput>> {
        self.stt.read().expect("registry lock poisoned").active()
    }

    pub fn tts(&self) -> Option<Arc<dyn SpeechOutput>> {
        self.tts.read().expect("registry lock poisoned").active()
    }

    pub fn reasoner(&self) -> Option<Arc<dyn Reasoner>> {
        self.reasoner.read().expect("registry lock poisoned").active()
    }

    pub fn ui(&self) -> Option<Arc<dyn UiSink>> {
        self.ui.read().expect("registry lock poisoned").active()
    }

    fn set_loaded(&self, name: &str, loaded: bool) -> bool {
        match name {
            "stt" => {
                let mut slot = self.stt.write().expect("registry lock poisoned");
                let had = slot.module.is_some();
                slot.loaded = loaded && had;
                had
            }
            "tts" => {
                let mut slot = self.tts.write().expect("registry lock poisoned");
                let had = slot.module.is_some();
                slot.loaded = loaded && had;
                had
            }
            "llm" => {
                let mut slot = self.reasoner.write().expect("registry lock poisoned");
                let had = slot.module.is_some();
                slot.loaded = loaded && had;
                had
            }
            "ui" => {
                let mut slot = self.ui.write().expect("registry lock poisoned");
                let had = slot.module.is_some();
                slot.loaded = loaded && had;
                had
            }
            other => {
                let mut flags = self.flags.write().expect("registry lock poisoned");
                match flags.get_mut(other) {
                    Some(flag) => {
                        *flag = loaded;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Park the heavy modules for SLEEP; returns the names actually unloaded
    pub fn unload_heavy(&self) -> Vec<String> {
        let mut unloaded = Vec::new();
        for name in HEAVY_MODULES {
            if self.set_loaded(name, false) {
                debug!(module = name, "module unloaded");
                unloaded.push(name.to_string());
            }
        }
        info!(count = unloaded.len(), "heavy modules unloaded for sleep");
        unloaded
    }

    /// Reload previously parked modules; returns names still missing
    pub fn reload(&self, names: &[String]) -> Vec<String> {
        let mut missing = Vec::new();
        for name in names {
            if self.set_loaded(name, true) {
                debug!(module = %name, "module reloaded");
            } else {
                missing.push(name.clone());
            }
        }
        missing
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        match name {
            "stt" => self.stt.read().expect("registry lock poisoned").active().is_some(),
            "tts" => self.tts.read().expect("registry lock poisoned").active().is_some(),
            "llm" => self.reasoner.read().expect("registry lock poisoned").active().is_some(),
            "ui" => self.ui.read().expect("registry lock poisoned").active().is_some(),
            other => self
                .flags
                .read()
                .expect("registry lock poisoned")
                .get(other)
                .copied()
                .unwrap_or(false),
        }
    }

    pub fn loaded_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for name in MODULE_NAMES {
            if self.is_loaded(name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
