//! Shared types and utilities for gpuscope
//!
//! This crate contains the data structures common to the scheduler, the
//! in-process capsule agent, and the profiler: region identity, trace
//! events, scheduler instructions, the wire protocol, and the watch-policy
//! plugin ABI.

pub mod policy;
pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{instruction::*, region::*};

/// Environment variable carrying the scheduler address to launched targets.
pub const SCHEDULER_ADDR_ENV: &str = "GPUSCOPE_SCHEDULER_ADDR";
