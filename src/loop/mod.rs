//! System Loop - the top-level scheduler driving the pipeline one quantum at
//! a time

mod engine;

pub use engine::{LoopConfig, SystemLoop};
