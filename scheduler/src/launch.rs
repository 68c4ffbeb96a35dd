//! Capsule process launch
//!
//! The scheduler can spawn workload processes itself; the capsule runtime
//! inside them finds the scheduler through the connection-address
//! environment variable. Launch does not wait for the handshake, the
//! world-size barrier covers that.

use crate::errors::SchedulerError;
use crate::Scheduler;
use gpuscope_shared::SCHEDULER_ADDR_ENV;
use tokio::process::{Child, Command};
use tracing::info;

impl Scheduler {
    /// Spawn `command` with the scheduler address exported in its
    /// environment. Returns as soon as the process starts; call
    /// [`Scheduler::wait_for_world_size`] to wait for it to connect.
    pub fn start_capsule(&self, command: &[String]) -> Result<Child, SchedulerError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SchedulerError::InvalidArgument(
                "capsule command must not be empty".to_string(),
            ));
        };
        let addr = self.local_addr().ok_or_else(|| {
            SchedulerError::InvalidArgument(
                "scheduler is not serving, call serve() before start_capsule".to_string(),
            )
        })?;

        let child = Command::new(program)
            .args(args)
            .env(SCHEDULER_ADDR_ENV, addr.to_string())
            .spawn()?;
        info!(
            program = %program,
            pid = child.id().unwrap_or_default(),
            "capsule process launched"
        );
        Ok(child)
    }
}
