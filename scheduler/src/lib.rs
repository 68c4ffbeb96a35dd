//! gpuscope scheduler
//!
//! The scheduler is the control-plane hub of a profiling run: capsule
//! processes connect to it over TCP, report region opens and closes, and
//! block on each close until the scheduler decides what happens next. On
//! top of that coordination it exposes stepwise control commands
//! (`record_range`, `profile_range`) and runs a watch policy over every
//! reported region.

pub mod config;
pub mod errors;
pub mod launch;
pub mod registry;
pub mod server;
pub mod step;
pub mod trace;
pub mod watch;

use crate::config::SchedulerConfig;
use crate::errors::SchedulerError;
use crate::registry::CapsuleRegistry;
use crate::step::ProfilePlan;
use crate::trace::RegionTrace;
use crate::watch::{load_policy, WatchPolicy};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, OnceLock};

/// The profiling scheduler. One instance coordinates one profiling run;
/// share it behind an [`std::sync::Arc`] to serve connections.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: CapsuleRegistry,
    trace: RegionTrace,
    plan: ProfilePlan,
    policy: Mutex<Box<dyn WatchPolicy>>,
    serving: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl Scheduler {
    /// Build a scheduler from `config`. Loads the watch policy eagerly so a
    /// broken script surfaces at startup, not at the first region report.
    pub fn new(config: SchedulerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let policy = load_policy(config.policy_path.as_deref());
        Ok(Self {
            trace: RegionTrace::new(config.max_buffered_events),
            registry: CapsuleRegistry::new(),
            plan: ProfilePlan::default(),
            policy: Mutex::new(policy),
            serving: AtomicBool::new(false),
            local_addr: OnceLock::new(),
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapsuleRegistry {
        &self.registry
    }

    pub fn trace(&self) -> &RegionTrace {
        &self.trace
    }

    pub fn plan(&self) -> &ProfilePlan {
        &self.plan
    }

    pub(crate) fn policy(&self) -> &Mutex<Box<dyn WatchPolicy>> {
        &self.policy
    }

    pub(crate) fn serving_flag(&self) -> &AtomicBool {
        &self.serving
    }

    pub(crate) fn set_local_addr(&self, addr: SocketAddr) {
        let _ = self.local_addr.set(addr);
    }

    /// The address the server actually bound, once [`Scheduler::serve`] has
    /// run. Useful with a `:0` listen address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of currently connected capsules.
    pub fn world_size(&self) -> usize {
        self.registry.world_size()
    }

    /// Block until `want` capsules are connected, honoring the configured
    /// barrier deadline (none by default).
    pub async fn wait_for_world_size(&self, want: usize) -> Result<(), SchedulerError> {
        self.registry
            .wait_for_world_size(want, self.config.barrier_deadline)
            .await
    }
}
