//! Scheduler configuration

use std::path::PathBuf;
use std::time::Duration;

/// Scheduler configuration. Defaults read the `GPUSCOPE_*` environment so a
/// bare `SchedulerConfig::default()` works in containers.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// TCP listen address for capsule connections
    pub listen_addr: String,

    /// Number of capsule processes expected to connect before coordinated
    /// profiling proceeds
    pub world_size: usize,

    /// Optional path to a user watch-policy WASM module, or the name of a
    /// built-in policy (`occupancy`, `pipe-throughput`)
    pub policy_path: Option<PathBuf>,

    /// Max completed regions kept in the in-memory trace
    pub max_buffered_events: usize,

    /// Optional deadline for the world-size barrier. None (the default)
    /// preserves the wait-forever semantic; callers supply their own bound
    /// if they need one.
    pub barrier_deadline: Option<Duration>,

    /// Optional deadline for `profile_range` snapshot collection
    pub step_deadline: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen_addr: std::env::var("GPUSCOPE_LISTEN")
                .unwrap_or_else(|_| "127.0.0.1:47851".to_string()),
            world_size: std::env::var("GPUSCOPE_WORLD_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            policy_path: std::env::var("GPUSCOPE_WATCH_SCRIPT").ok().map(PathBuf::from),
            max_buffered_events: std::env::var("GPUSCOPE_TRACE_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(65_536),
            barrier_deadline: None,
            step_deadline: None,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.world_size == 0 {
            anyhow::bail!("world size must be greater than 0");
        }
        if self.max_buffered_events == 0 {
            anyhow::bail!("trace buffer capacity must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_world_size_rejected() {
        let config = SchedulerConfig {
            world_size: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let config = SchedulerConfig {
            max_buffered_events: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
