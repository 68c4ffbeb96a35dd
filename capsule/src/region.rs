//! Hash-correlated instrumentation regions
//!
//! A region is open from construction until `close()` is called exactly
//! once. Opening notifies the capture engine and the scheduler; closing
//! computes the end hash from the *closing* call site (which may differ
//! from the opening site), stops capture, and performs the blocking
//! correlation handoff.

use crate::Capsule;
use anyhow::Result;
use gpuscope_shared::types::instruction::Instruction;
use gpuscope_shared::types::region::{region_hash, RegionEvent, RegionHash};
use gpuscope_shared::utils::time::system_time_millis;
use tracing::warn;

/// Scoped guard for one region instance.
///
/// Dropping an unclosed region closes it at its opening location, so the
/// capture bracket and the handoff are released on every exit path,
/// including early return and unwinding.
pub struct MetricRegion<'a> {
    capsule: &'a Capsule,
    name: String,
    begin_hash: RegionHash,
    begin_location: String,
    started_ms: u64,
    closed: bool,
}

impl<'a> MetricRegion<'a> {
    pub(crate) fn open(
        capsule: &'a Capsule,
        name: &str,
        begin_location: String,
    ) -> Result<Self> {
        let begin_hash = region_hash(&begin_location);
        capsule
            .engine()
            .start_capture(name, begin_hash, &begin_location)?;
        capsule
            .client()
            .report_open(begin_hash, name, &begin_location)?;
        Ok(Self {
            capsule,
            name: name.to_string(),
            begin_hash,
            begin_location,
            started_ms: system_time_millis(),
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn begin_hash(&self) -> RegionHash {
        self.begin_hash
    }

    /// Close the region at `end_location` (use [`crate::source_location!`]).
    ///
    /// Stops capture, then blocks the calling thread until the scheduler
    /// replies with an instruction. No other region may be opened by this
    /// thread while blocked.
    pub fn close(mut self, end_location: impl Into<String>) -> Result<Instruction> {
        self.closed = true;
        self.close_at(end_location.into())
    }

    fn close_at(&mut self, end_location: String) -> Result<Instruction> {
        let end_hash = region_hash(&end_location);
        self.capsule
            .engine()
            .stop_capture(self.begin_hash, end_hash, &end_location)?;

        let event = RegionEvent {
            name: self.name.clone(),
            begin_hash: self.begin_hash,
            end_hash,
            begin_location: self.begin_location.clone(),
            end_location,
            started_ms: self.started_ms,
            completed_ms: system_time_millis(),
        };

        let instruction = self.capsule.client().report_and_wait(event)?;
        self.capsule.note_instruction(&instruction);
        Ok(instruction)
    }
}

impl Drop for MetricRegion<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Release path for early returns: close at the opening location.
        let location = self.begin_location.clone();
        if let Err(e) = self.close_at(location) {
            warn!(region = %self.name, "implicit region close failed: {e:#}");
        }
    }
}
