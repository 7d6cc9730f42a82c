//! Session lifecycle: the three session kinds, their manager, the timeout
//! sweeper, and the append-only record store.

mod manager;
mod records;
mod types;

pub use manager::{SessionError, SessionManager, spawn_timeout_sweeper};
pub use records::{SessionRecord, SessionRecordStore, StatusTransition};
pub use types::Session;
