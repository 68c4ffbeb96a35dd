//! Checkpoint/replay collection loop
//!
//! To collect a metric set that needs `k` passes, the loop checkpoints
//! device memory once, then replays the workload `k` times, restoring the
//! checkpoint before every pass but the first. When the caller has
//! disallowed replay, incomplete collection after one pass is a warning,
//! not an error: partial counter data beats unbounded re-execution of a
//! workload the caller asserted is single-pass.

use crate::engine::CounterEngine;
use crate::session::{ProfileAuxInfo, RangeProfileSession};
use crate::ProfilerError;
use tracing::warn;

/// Outcome of one replay campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Passes actually executed
    pub passes: u64,

    /// Whether the engine finished collecting the requested metric set
    pub completed: bool,
}

impl<E: CounterEngine> RangeProfileSession<E> {
    /// Run the workload under counter collection until the engine reports
    /// the metric set complete, replaying via checkpoint/restore when
    /// `allow_replay` is set.
    ///
    /// Always flushes collected data into the counter image at the end,
    /// including the incomplete single-pass case.
    pub fn run_replay<F>(
        &mut self,
        allow_replay: bool,
        mut workload: F,
    ) -> Result<ReplayStats, ProfilerError>
    where
        F: FnMut() -> anyhow::Result<()>,
    {
        if !self.is_session_created() {
            return Err(ProfilerError::SessionNotCreated);
        }

        if allow_replay {
            self.checkpoint()?;
        }

        let mut passes = 0u64;
        let completed = loop {
            if passes > 0 {
                // Rewind device memory so the workload re-executes from the
                // same state it saw on the first pass.
                self.restore(false)?;
            }

            self.begin_pass()?;
            self.enable_profiling()?;
            workload()?;
            self.disable_profiling()?;
            let last = self.end_pass()?;
            passes += 1;

            if last {
                break true;
            }
            if !allow_replay {
                warn!(
                    passes,
                    "metric set needs more passes but replay is disallowed; \
                     accepting partial counter data"
                );
                break false;
            }
        };

        if allow_replay {
            self.free_checkpoint()?;
        }
        self.flush_data()?;

        self.set_profile_aux_info(ProfileAuxInfo {
            nb_passes: passes,
            ckpt_latencies_ms: self.ckpt_latencies().to_vec(),
            restore_latencies_ms: self.restore_latencies().to_vec(),
        });

        Ok(ReplayStats { passes, completed })
    }
}
