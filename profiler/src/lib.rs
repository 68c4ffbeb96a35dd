//! GPU counter profiling sessions
//!
//! Two mutually exclusive session kinds run on top of one [`CounterEngine`]:
//!
//! - [`session::RangeProfileSession`] — per-range counter aggregation with
//!   multi-pass checkpoint/replay collection, and
//! - [`sampling::PmSamplingSession`] — fixed-interval counter sampling into
//!   a bounded hardware ring buffer.
//!
//! The [`Profiler`] wrapper constructs exactly one kind per engine instance,
//! which is what enforces the exclusivity.

pub mod device;
pub mod engine;
pub mod replay;
pub mod sampling;
pub mod session;

pub use engine::CounterEngine;
pub use session::{RangeMode, RangeProfileSession, ReplayMode, SessionConfig};

/// Errors reported by profiling sessions.
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    /// Non-positive counts or invalid enum values passed to `start_session`
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("no profiling session created")]
    SessionNotCreated,

    #[error("profiling session already created")]
    SessionAlreadyCreated,

    #[error("a pass is already in progress")]
    PassInProgress,

    #[error("no pass in progress")]
    NoPassInProgress,

    /// Failure inside the underlying counter-collection engine
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// Which session kind a profiler was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerMode {
    Range,
    Sampling,
}

impl std::str::FromStr for ProfilerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "range" | "" => Ok(ProfilerMode::Range),
            "pm" | "sampling" => Ok(ProfilerMode::Sampling),
            _ => anyhow::bail!("invalid profiler mode: {}", s),
        }
    }
}

/// A profiler bound to one engine instance, running exactly one session kind.
pub enum Profiler<E: CounterEngine> {
    Range(session::RangeProfileSession<E>),
    Sampling(sampling::PmSamplingSession<E>),
}

impl<E: CounterEngine> Profiler<E> {
    pub fn new(engine: E, mode: ProfilerMode) -> Self {
        match mode {
            ProfilerMode::Range => Profiler::Range(session::RangeProfileSession::new(engine)),
            ProfilerMode::Sampling => {
                Profiler::Sampling(sampling::PmSamplingSession::new(engine))
            }
        }
    }

    pub fn is_range_profiling(&self) -> bool {
        matches!(self, Profiler::Range(_))
    }

    pub fn is_pm_sampling(&self) -> bool {
        matches!(self, Profiler::Sampling(_))
    }

    /// The range-profiling session, if this profiler was created in range mode.
    pub fn range(&mut self) -> Option<&mut session::RangeProfileSession<E>> {
        match self {
            Profiler::Range(s) => Some(s),
            Profiler::Sampling(_) => None,
        }
    }

    /// The sampling session, if this profiler was created in sampling mode.
    pub fn sampling(&mut self) -> Option<&mut sampling::PmSamplingSession<E>> {
        match self {
            Profiler::Range(_) => None,
            Profiler::Sampling(s) => Some(s),
        }
    }
}
