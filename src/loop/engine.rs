//! SystemLoop engine
//!
//! Per tick, in strict order: ask the queue to promote a pending state,
//! drive the coordinator's three layers, publish `CYCLE_COMPLETED`, bump the
//! working-context cycle index, and sleep briefly when nothing is pending.
//! One cycle is in flight at any time - the layers are awaited to completion
//! inside the tick, so the next tick cannot start before the previous
//! output layer finished.
//!
//! A "cycle" is a full input -> processing -> output traversal; idle ticks
//! (no input, nothing pending) complete no cycle and do not advance the
//! cycle index.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::WorkingContext;
use crate::coordinator::{CycleReport, ModuleCoordinator};
use crate::domain::UepState;
use crate::events::{EventBus, SystemEvent};
use crate::queue::StateQueue;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Inter-tick sleep when no state is pending (10-50 ms band)
    pub idle_sleep: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(25),
        }
    }
}

pub struct SystemLoop {
    queue: Arc<StateQueue>,
    coordinator: Arc<ModuleCoordinator>,
    bus: Arc<EventBus>,
    context: Arc<WorkingContext>,
    config: LoopConfig,
    running: AtomicBool,
}

impl SystemLoop {
    pub fn new(
        queue: Arc<StateQueue>,
        coordinator: Arc<ModuleCoordinator>,
        bus: Arc<EventBus>,
        context: Arc<WorkingContext>,
        config: LoopConfig,
    ) -> Self {
        Self {
            queue,
            coordinator,
            bus,
            context,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Run exactly one tick; exposed so tests can drive deterministically
    pub async fn tick(&self) -> CycleReport {
        // 1. Promote a pending state if nothing is executing
        self.queue.check_and_advance_state();

        // 2-3. Drive the three layers to completion
        let cycle_index = self.context.cycle_index();
        let report = self.coordinator.run_cycle(cycle_index).await;

        // 4-5. Completed cycles are announced and numbered
        if report.ran {
            self.bus.publish(
                SystemEvent::CycleCompleted,
                json!({
                    "cycle_index": cycle_index,
                    "success": report.success,
                    "error": report.error,
                }),
                "system_loop",
            );
            self.context.increment_cycle_index();
        }
        report
    }

    /// Main loop body; returns after `stop()` once the current cycle ends
    pub async fn run(self: Arc<Self>) {
        info!("system loop started");
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            let report = self.tick().await;

            let nothing_pending =
                self.queue.current_state() == UepState::Idle && self.queue.status().queue_length == 0;
            if !report.ran && nothing_pending {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        }

        info!("system loop stopped");
    }

    /// Spawn the loop on a dedicated worker task
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(engine.run())
    }

    /// Graceful stop: the in-flight cycle completes before the loop exits
    pub fn stop(&self) {
        debug!("system loop stop requested");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
