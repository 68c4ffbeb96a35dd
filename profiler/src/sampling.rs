//! Fixed-interval counter sampling (PM mode)
//!
//! Alternative to per-range aggregation: the engine samples hardware
//! counters on a fixed interval into a bounded ring buffer. Mutually
//! exclusive with range profiling on the same engine instance (enforced by
//! [`crate::Profiler`]).

use crate::engine::CounterEngine;
use crate::ProfilerError;

/// Sampling window configuration.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Hardware ring buffer size in bytes
    pub hw_buf_size: u64,

    /// Sampling interval in engine clock cycles
    pub sampling_interval: u64,

    /// Maximum number of retained samples
    pub max_samples: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            hw_buf_size: 512 * 1024 * 1024,
            sampling_interval: 100_000,
            max_samples: 10_000,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ProfilerError> {
        let positive = [
            ("hw_buf_size", self.hw_buf_size),
            ("sampling_interval", self.sampling_interval),
            ("max_samples", self.max_samples),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ProfilerError::InvalidConfiguration(format!(
                    "{} must be strictly positive",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Counter-sampling session.
pub struct PmSamplingSession<E: CounterEngine> {
    engine: E,
    configured: bool,
    sampling: bool,
}

impl<E: CounterEngine> PmSamplingSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            configured: false,
            sampling: false,
        }
    }

    pub fn set_config(&mut self, cfg: SamplingConfig) -> Result<(), ProfilerError> {
        cfg.validate()?;
        self.engine.configure_sampling(&cfg)?;
        self.configured = true;
        Ok(())
    }

    /// Open the sampling window.
    pub fn start_profiling(&mut self) -> Result<(), ProfilerError> {
        if !self.configured {
            return Err(ProfilerError::SessionNotCreated);
        }
        self.engine.start_sampling()?;
        self.sampling = true;
        Ok(())
    }

    /// Close the sampling window.
    pub fn stop_profiling(&mut self) -> Result<(), ProfilerError> {
        if !self.sampling {
            return Err(ProfilerError::NoPassInProgress);
        }
        self.engine.stop_sampling()?;
        self.sampling = false;
        Ok(())
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    pub fn metrics(&self) -> Result<Vec<(String, f64)>, ProfilerError> {
        self.engine.collect_metrics().map_err(Into::into)
    }
}
