//! Watch policies
//!
//! A watch policy decides, per reported region, what to do next: pass,
//! warn, or fail (which stops the reporting capsule). User policies are
//! WASM modules loaded from a configured path; the [`presets`] policies are
//! selected by name instead of a path. When no usable policy is found the
//! built-in no-op policy runs and a warning is surfaced — a missing policy
//! is never a hard failure.
//!
//! Counter values visible to a policy come from snapshots pushed by an
//! earlier `profile_range` step; a metric that was never collected is
//! simply absent from the context.

pub mod presets;
pub mod wasm;
pub mod zoom;

use gpuscope_profiler::device::DeviceProps;
use gpuscope_shared::types::region::RegionEvent;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub use gpuscope_shared::policy::PolicyVerdict as Verdict;

/// Everything a policy may inspect for one reported region.
pub struct StepContext {
    /// The region that just completed
    pub event: RegionEvent,

    /// Recent completed regions, oldest first
    pub recent_events: Vec<RegionEvent>,

    /// Counter values available for the current capture window
    pub counters: BTreeMap<String, f64>,

    /// Device the reporting capsule runs on, when known
    pub device: Option<DeviceProps>,
}

impl StepContext {
    /// Values for the named counters, in request order, once *all* of them
    /// are available for the current capture window; `None` until then.
    /// Counters are populated from the latest `profile_range` snapshot for
    /// this region, resolved before the policy is invoked, so this does not
    /// block inside the policy.
    pub fn watch(&self, metric_names: &[&str]) -> Option<Vec<f64>> {
        metric_names
            .iter()
            .map(|name| self.counters.get(*name).copied())
            .collect()
    }
}

/// One capability: decide what to do about a reported region.
pub trait WatchPolicy: Send {
    fn name(&self) -> &str;

    fn decide(&mut self, ctx: &StepContext) -> anyhow::Result<Verdict>;
}

/// The default policy: pass-through, no action.
pub struct NoopPolicy;

impl WatchPolicy for NoopPolicy {
    fn name(&self) -> &str {
        "noop"
    }

    fn decide(&mut self, _ctx: &StepContext) -> anyhow::Result<Verdict> {
        Ok(Verdict::Pass)
    }
}

/// Load the watch policy for this scheduler, falling back to [`NoopPolicy`]
/// with a warning on any problem. Built-in policies are addressed by name
/// (`occupancy`, `pipe-throughput`) instead of a module path.
pub fn load_policy(path: Option<&Path>) -> Box<dyn WatchPolicy> {
    let Some(path) = path else {
        warn!("no watch script given, using default policy");
        return Box::new(NoopPolicy);
    };
    match path.to_str() {
        Some("occupancy") => {
            info!("built-in occupancy watch policy selected");
            return Box::new(presets::OccupancyPolicy::default());
        }
        Some("pipe-throughput") => {
            info!("built-in pipe-throughput watch policy selected");
            return Box::new(presets::PipeThroughputPolicy::default());
        }
        _ => {}
    }
    if !path.exists() {
        warn!(path = %path.display(), "watch script not found, using default policy");
        return Box::new(NoopPolicy);
    }
    match wasm::WasmPolicy::new(path) {
        Ok(policy) => {
            info!(path = %path.display(), "watch policy loaded");
            Box::new(policy)
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                "failed to load watch script, using default policy: {e:#}"
            );
            Box::new(NoopPolicy)
        }
    }
}
