//! State Manager - owns the authoritative current state and the side-effect
//! policy for state changes

mod manager;

pub use manager::{StateChangeContext, StateManager, StateManagerConfig};
