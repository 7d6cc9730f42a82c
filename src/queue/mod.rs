//! State Queue - the scheduling surface between intent analysis and state
//! execution

mod item;
mod manager;

pub use item::{StateQueueItem, StateRequest};
pub use manager::{CHAT_INTERRUPT_PRIORITY, QueueStatus, StateQueue};
