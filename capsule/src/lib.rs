//! In-process profiling agent ("capsule")
//!
//! Embedded in the target program, a capsule connects back to the
//! scheduler, brackets user-declared regions for hardware capture, and
//! reports every completed region through a blocking correlation handoff.
//! It also owns at most one counter [`Profiler`] for range or sampling
//! collection.
//!
//! ```no_run
//! use gpuscope_capsule::{engine, source_location, Capsule};
//!
//! # fn main() -> anyhow::Result<()> {
//! let capsule = Capsule::connect_from_env(engine::load_engine(None)?)?;
//! let region = capsule.open_region("matmul", source_location!())?;
//! // ... workload ...
//! let instruction = region.close(source_location!())?;
//! # Ok(()) }
//! ```

pub mod client;
pub mod engine;
pub mod region;

pub use gpuscope_profiler::{Profiler, ProfilerMode};
pub use region::MetricRegion;

use anyhow::{Context, Result};
use client::SchedulerClient;
use engine::CaptureEngine;
use gpuscope_shared::types::instruction::Instruction;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub use gpuscope_shared::SCHEDULER_ADDR_ENV;

/// One capsule per target process.
pub struct Capsule {
    client: SchedulerClient,
    engine: Box<dyn CaptureEngine>,
    stopped: AtomicBool,
}

impl Capsule {
    /// Connect to the scheduler at `addr` and register this process.
    pub fn connect(addr: &str, engine: Box<dyn CaptureEngine>) -> Result<Self> {
        let pid = std::process::id();
        let client = SchedulerClient::connect(addr, pid)?;
        info!(pid, addr, "capsule registered with scheduler");
        Ok(Self {
            client,
            engine,
            stopped: AtomicBool::new(false),
        })
    }

    /// Connect using the address the scheduler passed through the
    /// environment at launch.
    pub fn connect_from_env(engine: Box<dyn CaptureEngine>) -> Result<Self> {
        let addr = std::env::var(SCHEDULER_ADDR_ENV)
            .with_context(|| format!("{} not set; was this process launched by the scheduler?", SCHEDULER_ADDR_ENV))?;
        Self::connect(&addr, engine)
    }

    /// Open an instrumentation region at the caller's source location
    /// (use [`source_location!`]).
    pub fn open_region(&self, name: &str, location: impl Into<String>) -> Result<MetricRegion<'_>> {
        MetricRegion::open(self, name, location.into())
    }

    /// Whether the scheduler has told this capsule to stop the workload.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Push a counter snapshot collected in response to
    /// [`Instruction::Reconfigure`].
    pub fn report_counters(&self, region_name: &str, metrics: Vec<(String, f64)>) -> Result<()> {
        self.client.report_counters(region_name, metrics)
    }

    /// Orderly disconnect from the scheduler.
    pub fn shutdown(self) -> Result<()> {
        self.client.goodbye()
    }

    pub(crate) fn engine(&self) -> &dyn CaptureEngine {
        self.engine.as_ref()
    }

    pub(crate) fn client(&self) -> &SchedulerClient {
        &self.client
    }

    pub(crate) fn note_instruction(&self, instruction: &Instruction) {
        if matches!(instruction, Instruction::Stop) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }
}

/// The caller's source location as a `file:line` string; the input to the
/// region identity hash.
#[macro_export]
macro_rules! source_location {
    () => {
        format!("{}:{}", file!(), line!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuscope_shared::types::region::region_hash;

    #[test]
    fn test_source_location_shape() {
        let location = source_location!();
        let (file, line) = location.rsplit_once(':').unwrap();
        assert!(file.ends_with("lib.rs"));
        assert!(line.parse::<u32>().is_ok());
    }

    #[test]
    fn test_same_line_locations_hash_equal() {
        // Two regions declared at the identical source location are the
        // same declared region.
        let a = "src/train.rs:120";
        let b = "src/train.rs:120";
        assert_eq!(region_hash(a), region_hash(b));
    }
}
