//! Event system for the UEP orchestrator
//!
//! Two buses share the subscribe/publish shape:
//! - the main [`EventBus`] carries lifecycle and cycle events between core
//!   components, synchronously, in subscription order;
//! - the [`FrontendBus`] carries high-frequency UI tick events with inline
//!   delivery and no queueing.

mod bus;
mod frontend;
mod types;

pub use bus::{EventBus, create_event_bus};
pub use frontend::FrontendBus;
pub use types::{Event, SystemEvent};
