//! The narrow seam to the driver-level counter-collection engine
//!
//! Everything below this trait (CUPTI-style session management, counter
//! image materialization, device-memory checkpointing) is an opaque native
//! service; the sessions in this crate only rely on the call shapes here.

use crate::sampling::SamplingConfig;
use crate::session::SessionConfig;
use anyhow::Result;

/// Driver-level counter engine primitives.
///
/// `end_pass` returning `true` means the engine has gathered all data needed
/// for the requested metric set; `false` means at least one more pass is
/// required. `restore` without a prior `checkpoint` is a caller error and is
/// forwarded unchecked.
pub trait CounterEngine {
    // Range-profiling session control
    fn create_session(&mut self, cfg: &SessionConfig) -> Result<()>;
    fn destroy_session(&mut self) -> Result<()>;
    fn begin_pass(&mut self) -> Result<()>;
    fn end_pass(&mut self) -> Result<bool>;
    fn enable_profiling(&mut self) -> Result<()>;
    fn disable_profiling(&mut self) -> Result<()>;
    fn push_range(&mut self, name: &str) -> Result<()>;
    fn pop_range(&mut self) -> Result<()>;

    /// Materialize collected counters into the queryable counter image
    fn flush_data(&mut self) -> Result<()>;
    fn reset_counter_data(&mut self) -> Result<()>;
    fn collect_metrics(&self) -> Result<Vec<(String, f64)>>;

    // Device-memory checkpointing
    fn checkpoint(&mut self) -> Result<()>;
    fn restore(&mut self, pop: bool) -> Result<()>;
    fn free_checkpoint(&mut self) -> Result<()>;

    // Fixed-interval counter sampling
    fn configure_sampling(&mut self, cfg: &SamplingConfig) -> Result<()>;
    fn start_sampling(&mut self) -> Result<()>;
    fn stop_sampling(&mut self) -> Result<()>;
}

/// Every engine call a [`SimEngine`] records, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    CreateSession,
    DestroySession,
    BeginPass,
    EndPass,
    Enable,
    Disable,
    PushRange(String),
    PopRange,
    FlushData,
    ResetCounterData,
    Checkpoint,
    Restore,
    FreeCheckpoint,
    ConfigureSampling,
    StartSampling,
    StopSampling,
}

/// Deterministic in-memory engine used by tests and dry runs.
///
/// Pretends the requested metric set needs `passes_required` passes and
/// records every call for loop-shape assertions.
#[derive(Debug, Default)]
pub struct SimEngine {
    /// Passes the simulated metric set needs before `end_pass` reports done
    pub passes_required: u64,

    /// Canned counter image returned by `collect_metrics`
    pub counter_image: Vec<(String, f64)>,

    passes_done: u64,
    checkpoint_depth: usize,
    pub calls: Vec<SimCall>,
}

impl SimEngine {
    pub fn needing_passes(passes_required: u64) -> Self {
        Self {
            passes_required,
            ..Self::default()
        }
    }

    pub fn with_counters(mut self, counters: Vec<(String, f64)>) -> Self {
        self.counter_image = counters;
        self
    }

    /// Number of recorded calls matching `call`.
    pub fn count(&self, call: &SimCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl CounterEngine for SimEngine {
    fn create_session(&mut self, _cfg: &SessionConfig) -> Result<()> {
        self.calls.push(SimCall::CreateSession);
        self.passes_done = 0;
        Ok(())
    }

    fn destroy_session(&mut self) -> Result<()> {
        self.calls.push(SimCall::DestroySession);
        Ok(())
    }

    fn begin_pass(&mut self) -> Result<()> {
        self.calls.push(SimCall::BeginPass);
        Ok(())
    }

    fn end_pass(&mut self) -> Result<bool> {
        self.calls.push(SimCall::EndPass);
        self.passes_done += 1;
        Ok(self.passes_done >= self.passes_required)
    }

    fn enable_profiling(&mut self) -> Result<()> {
        self.calls.push(SimCall::Enable);
        Ok(())
    }

    fn disable_profiling(&mut self) -> Result<()> {
        self.calls.push(SimCall::Disable);
        Ok(())
    }

    fn push_range(&mut self, name: &str) -> Result<()> {
        self.calls.push(SimCall::PushRange(name.to_string()));
        Ok(())
    }

    fn pop_range(&mut self) -> Result<()> {
        self.calls.push(SimCall::PopRange);
        Ok(())
    }

    fn flush_data(&mut self) -> Result<()> {
        self.calls.push(SimCall::FlushData);
        Ok(())
    }

    fn reset_counter_data(&mut self) -> Result<()> {
        self.calls.push(SimCall::ResetCounterData);
        self.passes_done = 0;
        Ok(())
    }

    fn collect_metrics(&self) -> Result<Vec<(String, f64)>> {
        Ok(self.counter_image.clone())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.calls.push(SimCall::Checkpoint);
        self.checkpoint_depth += 1;
        Ok(())
    }

    fn restore(&mut self, pop: bool) -> Result<()> {
        self.calls.push(SimCall::Restore);
        anyhow::ensure!(self.checkpoint_depth > 0, "restore without checkpoint");
        if pop {
            self.checkpoint_depth -= 1;
        }
        Ok(())
    }

    fn free_checkpoint(&mut self) -> Result<()> {
        self.calls.push(SimCall::FreeCheckpoint);
        anyhow::ensure!(self.checkpoint_depth > 0, "free without checkpoint");
        self.checkpoint_depth -= 1;
        Ok(())
    }

    fn configure_sampling(&mut self, _cfg: &SamplingConfig) -> Result<()> {
        self.calls.push(SimCall::ConfigureSampling);
        Ok(())
    }

    fn start_sampling(&mut self) -> Result<()> {
        self.calls.push(SimCall::StartSampling);
        Ok(())
    }

    fn stop_sampling(&mut self) -> Result<()> {
        self.calls.push(SimCall::StopSampling);
        Ok(())
    }
}
