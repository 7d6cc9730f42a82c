//! Core aggregate - explicit ownership and wiring of every component
//!
//! No module-level singletons: a `Core` owns the buses, context, stores,
//! managers, coordinator, and loop, and wires their handlers at startup.
//! Each test builds a fresh `Core` over a temp directory.

use std::sync::{Arc, Mutex};

use eyre::Result;
use tokio::task::JoinHandle;
use tracing::info;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::context::{AccumulationDecision, WorkingContext};
use crate::coordinator::ModuleCoordinator;
use crate::events::{EventBus, FrontendBus, create_event_bus};
use crate::intent::{HeuristicTagger, IntentSegmenter, WorkflowValidator};
use crate::memory::{IdentityStore, InMemorySnapshotStore, MemoryStore};
use crate::modules::ModuleRegistry;
use crate::queue::StateQueue;
use crate::r#loop::{LoopConfig, SystemLoop};
use crate::session::{SessionManager, SessionRecordStore, spawn_timeout_sweeper};
use crate::state::{StateManager, StateManagerConfig};
use crate::status::StatusModel;
use crate::workflow::{ImmediateRunner, ToolBridge, WorkflowCatalog};

pub struct Core {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub frontend_bus: Arc<FrontendBus>,
    pub context: Arc<WorkingContext>,
    pub status: Arc<StatusModel>,
    pub sessions: Arc<SessionManager>,
    pub queue: Arc<StateQueue>,
    pub identities: Arc<IdentityStore>,
    pub memory: Arc<InMemorySnapshotStore>,
    pub registry: Arc<ModuleRegistry>,
    pub coordinator: Arc<ModuleCoordinator>,
    pub state_manager: Arc<StateManager>,
    pub system_loop: Arc<SystemLoop>,
    /// True when startup found a sleep context from a previous run
    pub resumed_sleep: bool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    /// Build and wire a core from configuration
    ///
    /// Capability modules (stt, tts, llm, ui) are registered on
    /// `core.registry` afterwards; none are required for the core itself.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.memory_dir())?;

        let bus = create_event_bus();
        let frontend_bus = Arc::new(FrontendBus::new());
        let context = Arc::new(WorkingContext::new());
        let status = Arc::new(StatusModel::new());

        let records = SessionRecordStore::open(config.session_records_path());
        let sessions = Arc::new(SessionManager::new(bus.clone(), records));
        sessions.set_max_session_age(config.session.max_age_secs);

        let queue = Arc::new(StateQueue::open(
            config.state_queue_path(),
            bus.clone(),
            context.clone(),
        ));
        let identities = Arc::new(IdentityStore::open(config.identities_dir()));
        let memory = Arc::new(InMemorySnapshotStore::new());
        let registry = Arc::new(ModuleRegistry::new());

        let runner = Arc::new(ImmediateRunner::new(bus.clone(), sessions.clone()));
        let bridge = Arc::new(ToolBridge::new(memory.clone() as Arc<dyn MemoryStore>, runner));

        let segmenter = Arc::new(IntentSegmenter::new(
            Box::new(HeuristicTagger::new()),
            WorkflowValidator::new(WorkflowCatalog::builtin()),
        ));

        let coordinator = Arc::new(ModuleCoordinator::new(
            bus.clone(),
            frontend_bus.clone(),
            context.clone(),
            sessions.clone(),
            identities.clone(),
            memory.clone() as Arc<dyn MemoryStore>,
            status.clone(),
            registry.clone(),
            bridge,
            segmenter,
            queue.clone(),
            Chunker::new(config.chunker.max_chars, config.chunker.min_chars),
            config.tools.timeout(),
        ));
        coordinator.subscribe();

        let state_manager = Arc::new(StateManager::new(
            bus.clone(),
            context.clone(),
            sessions.clone(),
            status.clone(),
            queue.clone(),
            coordinator.clone(),
            registry.clone(),
            StateManagerConfig {
                mischief_enabled: config.state.mischief_enabled,
                sleep_boredom_threshold: config.state.sleep_boredom_threshold,
                sleep_inactivity_secs: config.state.sleep_inactivity_secs,
                sleep_context_path: config.sleep_context_path(),
                ..Default::default()
            },
        ));
        state_manager.register_queue_handlers();
        state_manager.subscribe_events();
        let resumed_sleep = state_manager.detect_resumed_sleep();

        // Default identity policy: crossing the sample threshold creates
        // the identity; the input layer applies the decision
        context.register_decider("speaker_identification", |_| AccumulationDecision::CreateIdentity);

        let system_loop = Arc::new(SystemLoop::new(
            queue.clone(),
            coordinator.clone(),
            bus.clone(),
            context.clone(),
            LoopConfig {
                idle_sleep: std::time::Duration::from_millis(config.system_loop.idle_sleep_ms),
            },
        ));

        info!(memory_dir = %config.memory_dir().display(), resumed_sleep, "core wired");
        Ok(Self {
            config,
            bus,
            frontend_bus,
            context,
            status,
            sessions,
            queue,
            identities,
            memory,
            registry,
            coordinator,
            state_manager,
            system_loop,
            resumed_sleep,
            loop_handle: Mutex::new(None),
            sweeper_handle: Mutex::new(None),
        })
    }

    /// Start the system loop and the session timeout sweeper
    pub fn start(&self) {
        let mut loop_handle = self.loop_handle.lock().expect("core lock poisoned");
        if loop_handle.is_none() {
            *loop_handle = Some(self.system_loop.start());
        }
        let mut sweeper_handle = self.sweeper_handle.lock().expect("core lock poisoned");
        if sweeper_handle.is_none() {
            *sweeper_handle = Some(spawn_timeout_sweeper(self.sessions.clone()));
        }
        info!("core started");
    }

    /// Graceful stop: the in-flight cycle finishes, then workers wind down
    pub async fn stop(&self) {
        self.system_loop.stop();
        if let Some(handle) = self.loop_handle.lock().expect("core lock poisoned").take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.sweeper_handle.lock().expect("core lock poisoned").take() {
            handle.abort();
        }
        info!("core stopped");
    }

    /// Wake from SLEEP (delegates to the state manager)
    pub fn wake(&self, reason: &str) -> bool {
        self.state_manager.wake(reason)
    }
}
