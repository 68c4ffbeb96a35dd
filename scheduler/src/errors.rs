//! Scheduler error types

use gpuscope_shared::types::region::RegionHash;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Wrong or missing kwargs shape passed to `execute_step`
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A region close was reported with no matching open region: the
    /// capsule and scheduler have desynchronized
    #[error("no open region matching begin_hash {0:#018x}")]
    UnmatchedRegion(RegionHash),

    /// Optional barrier deadline exceeded
    #[error("deadline exceeded waiting for world size {want} (have {have})")]
    BarrierTimeout { want: usize, have: usize },

    /// Optional profile-step deadline exceeded
    #[error("deadline exceeded waiting for counter snapshots: missing {0:?}")]
    StepTimeout(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
