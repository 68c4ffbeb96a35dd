//! Built-in watch policies
//!
//! Ready-made policies for the two most common triage questions: is
//! occupancy low, and is a compute pipe underfed. Both degrade to `Pass`
//! with a warning when the counters they need are not available for the
//! current capture window.

use super::{StepContext, Verdict, WatchPolicy};
use crate::watch::zoom::{zoom_search, Comparator};
use anyhow::Result;
use std::collections::HashMap;
use tracing::warn;

const OCCUPANCY_METRIC: &str = "sm__warps_active.avg.pct_of_peak_sustained_active";
const FMA_THROUGHPUT_METRIC: &str = "sm__pipe_fma_cycles_active.avg.pct_of_peak_sustained_active";

/// Flag regions whose achieved occupancy falls below a threshold.
pub struct OccupancyPolicy {
    threshold: f64,
}

impl OccupancyPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for OccupancyPolicy {
    fn default() -> Self {
        Self::new(0.4)
    }
}

impl WatchPolicy for OccupancyPolicy {
    fn name(&self) -> &str {
        "occupancy"
    }

    fn decide(&mut self, ctx: &StepContext) -> Result<Verdict> {
        let Some(values) = ctx.watch(&[OCCUPANCY_METRIC]) else {
            warn!(
                region = %ctx.event.name,
                "occupancy counter unavailable for this window"
            );
            return Ok(Verdict::Pass);
        };
        let occupancy = values[0];

        if occupancy < self.threshold {
            let mut detail = format!(
                "region {} achieved occupancy {:.2} below {:.2}",
                ctx.event.name, occupancy, self.threshold
            );
            if let Some(device) = &ctx.device {
                detail.push_str(&format!(
                    " (device {}: {} SMs, {} regs/SM)",
                    device.device_id, device.num_sms, device.regs_per_sm
                ));
            }
            return Ok(Verdict::Fail(detail));
        }
        Ok(Verdict::Pass)
    }
}

/// Flag windows where the FMA pipe runs underfed, then narrow to the
/// worst offending regions seen so far.
pub struct PipeThroughputPolicy {
    threshold: f64,
    top_k: usize,
    // Latest watched throughput per region name, across the run
    history: HashMap<String, f64>,
}

impl PipeThroughputPolicy {
    pub fn new(threshold: f64, top_k: usize) -> Self {
        Self {
            threshold,
            top_k,
            history: HashMap::new(),
        }
    }
}

impl Default for PipeThroughputPolicy {
    fn default() -> Self {
        Self::new(0.5, 5)
    }
}

impl WatchPolicy for PipeThroughputPolicy {
    fn name(&self) -> &str {
        "pipe-throughput"
    }

    fn decide(&mut self, ctx: &StepContext) -> Result<Verdict> {
        let Some(values) = ctx.watch(&[FMA_THROUGHPUT_METRIC]) else {
            warn!(
                region = %ctx.event.name,
                "pipe throughput counter unavailable for this window"
            );
            return Ok(Verdict::Pass);
        };
        let throughput = values[0];
        self.history.insert(ctx.event.name.clone(), throughput);

        if throughput >= self.threshold {
            return Ok(Verdict::Pass);
        }

        let candidates: Vec<(String, f64)> = self
            .history
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        let suspects = zoom_search(&candidates, self.threshold, Comparator::Le, self.top_k);
        if suspects.is_empty() {
            // Low throughput with no suspect region usually means the
            // bottleneck sits outside the device.
            return Ok(Verdict::Warn(
                "low pipe throughput but no suspect region, likely host bound".to_string(),
            ));
        }
        Ok(Verdict::Fail(format!(
            "fma pipe throughput {:.2} below {:.2}, worst regions: {}",
            throughput,
            self.threshold,
            suspects.join(", ")
        )))
    }
}
