//! Multi-pass range-profiling session state machine
//!
//! Lifecycle: `Uncreated → Created(idle) → InPass → Created(idle) → … →
//! Destroyed`. While created, the session accepts any number of
//! `begin_pass / enable / workload / disable / end_pass` cycles; passes are
//! single-threaded and never overlap.

use crate::engine::CounterEngine;
use crate::ProfilerError;
use std::collections::HashMap;
use std::time::Instant;

/// How ranges are declared within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    Auto,
    User,
}

/// How the engine replays kernels across passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Kernel,
    User,
}

/// Capture-window bounds for one range-profiling session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// GPU device the session binds to
    pub device_id: u32,
    pub max_launches_per_pass: u32,
    pub max_ranges_per_pass: u32,
    pub range_mode: RangeMode,
    pub replay_mode: ReplayMode,
    pub min_nesting_level: u32,
    pub num_nesting_levels: u32,
    pub target_nesting_levels: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            max_launches_per_pass: 512,
            max_ranges_per_pass: 64,
            range_mode: RangeMode::User,
            replay_mode: ReplayMode::User,
            min_nesting_level: 1,
            num_nesting_levels: 1,
            target_nesting_levels: 1,
        }
    }
}

impl SessionConfig {
    /// All count/level parameters must be strictly positive.
    pub fn validate(&self) -> Result<(), ProfilerError> {
        let positive = [
            ("max_launches_per_pass", self.max_launches_per_pass),
            ("max_ranges_per_pass", self.max_ranges_per_pass),
            ("min_nesting_level", self.min_nesting_level),
            ("num_nesting_levels", self.num_nesting_levels),
            ("target_nesting_levels", self.target_nesting_levels),
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

/// Bookkeeping recorded alongside a collection campaign.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileAuxInfo {
    pub nb_passes: u64,
    pub ckpt_latencies_ms: Vec<f64>,
    pub restore_latencies_ms: Vec<f64>,
}

/// Per-capsule state machine for multi-pass hardware counter collection.
pub struct RangeProfileSession<E: CounterEngine> {
    engine: E,
    created: bool,
    in_pass: bool,
    pass_count: u64,
    ckpt_latencies_ms: Vec<f64>,
    restore_latencies_ms: Vec<f64>,
    range_latencies_ms: HashMap<String, Vec<f64>>,
    aux: ProfileAuxInfo,
}

impl<E: CounterEngine> RangeProfileSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            created: false,
            in_pass: false,
            pass_count: 0,
            ckpt_latencies_ms: Vec::new(),
            restore_latencies_ms: Vec::new(),
            range_latencies_ms: HashMap::new(),
            aux: ProfileAuxInfo::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Create the underlying engine session and bind it to the configured
    /// device context.
    pub fn start_session(&mut self, cfg: SessionConfig) -> Result<(), ProfilerError> {
        if self.created {
            return Err(ProfilerError::SessionAlreadyCreated);
        }
        cfg.validate()?;
        self.engine.create_session(&cfg)?;
        self.created = true;
        tracing::debug!(device_id = cfg.device_id, "range profiling session created");
        Ok(())
    }

    pub fn destroy_session(&mut self) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        self.engine.destroy_session()?;
        self.created = false;
        self.in_pass = false;
        Ok(())
    }

    pub fn is_session_created(&self) -> bool {
        self.created
    }

    pub fn begin_pass(&mut self) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        if self.in_pass {
            return Err(ProfilerError::PassInProgress);
        }
        self.engine.begin_pass()?;
        self.in_pass = true;
        Ok(())
    }

    /// Ends the current pass. Returns `true` once the engine has gathered
    /// all data needed for the requested metric set.
    pub fn end_pass(&mut self) -> Result<bool, ProfilerError> {
        if !self.in_pass {
            return Err(ProfilerError::NoPassInProgress);
        }
        let last = self.engine.end_pass()?;
        self.in_pass = false;
        self.pass_count += 1;
        Ok(last)
    }

    pub fn enable_profiling(&mut self) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        self.engine.enable_profiling().map_err(Into::into)
    }

    pub fn disable_profiling(&mut self) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        self.engine.disable_profiling().map_err(Into::into)
    }

    /// Open a named nested sub-range. The caller is responsible for
    /// balanced push/pop.
    pub fn push_range(&mut self, name: &str) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        self.engine.push_range(name).map_err(Into::into)
    }

    pub fn pop_range(&mut self) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        self.engine.pop_range().map_err(Into::into)
    }

    /// Materialize collected counters into the queryable counter image.
    pub fn flush_data(&mut self) -> Result<(), ProfilerError> {
        self.ensure_created()?;
        self.engine.flush_data().map_err(Into::into)
    }

    /// Snapshot the device memory state. The duration is appended to the
    /// checkpoint latency log.
    pub fn checkpoint(&mut self) -> Result<(), ProfilerError> {
        let start = Instant::now();
        self.engine.checkpoint()?;
        self.ckpt_latencies_ms
            .push(start.elapsed().as_secs_f64() * 1e3);
        Ok(())
    }

    /// Reload the most recent checkpoint, popping it when `pop` is set.
    /// Calling this without a prior `checkpoint` is a caller error.
    pub fn restore(&mut self, pop: bool) -> Result<(), ProfilerError> {
        let start = Instant::now();
        self.engine.restore(pop)?;
        self.restore_latencies_ms
            .push(start.elapsed().as_secs_f64() * 1e3);
        Ok(())
    }

    pub fn free_checkpoint(&mut self) -> Result<(), ProfilerError> {
        self.engine.free_checkpoint().map_err(Into::into)
    }

    /// Clear pass count, all latency logs, and recorded per-region
    /// latencies. This is the only supported way to reuse a session across
    /// unrelated measurement campaigns without destroying it.
    pub fn reset_counter_data(&mut self) -> Result<(), ProfilerError> {
        self.engine.reset_counter_data()?;
        self.pass_count = 0;
        self.ckpt_latencies_ms.clear();
        self.restore_latencies_ms.clear();
        self.range_latencies_ms.clear();
        self.aux = ProfileAuxInfo::default();
        Ok(())
    }

    pub fn set_profile_aux_info(&mut self, aux: ProfileAuxInfo) {
        self.aux = aux;
    }

    pub fn profile_aux_info(&self) -> &ProfileAuxInfo {
        &self.aux
    }

    /// Append one observed wall-clock latency for a named range.
    pub fn set_range_latency(&mut self, range_name: &str, latency_ms: f64) {
        self.range_latencies_ms
            .entry(range_name.to_string())
            .or_default()
            .push(latency_ms);
    }

    pub fn range_latencies(&self) -> &HashMap<String, Vec<f64>> {
        &self.range_latencies_ms
    }

    pub fn metrics(&self) -> Result<Vec<(String, f64)>, ProfilerError> {
        self.engine.collect_metrics().map_err(Into::into)
    }

    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    pub fn ckpt_latencies(&self) -> &[f64] {
        &self.ckpt_latencies_ms
    }

    pub fn restore_latencies(&self) -> &[f64] {
        &self.restore_latencies_ms
    }

    fn ensure_created(&self) -> Result<(), ProfilerError> {
        if !self.created {
            return Err(ProfilerError::SessionNotCreated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SimCall, SimEngine};

    fn created_session(passes: u64) -> RangeProfileSession<SimEngine> {
        let mut session = RangeProfileSession::new(SimEngine::needing_passes(passes));
        session.start_session(SessionConfig::default()).unwrap();
        session
    }

    #[test]
    fn test_config_rejects_non_positive_counts() {
        let cfg = SessionConfig {
            max_ranges_per_pass: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ProfilerError::InvalidConfiguration(_))
        ));

        let cfg = SessionConfig {
            min_nesting_level: 0,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_leaves_session_uncreated() {
        let mut session = RangeProfileSession::new(SimEngine::default());
        let cfg = SessionConfig {
            max_launches_per_pass: 0,
            ..SessionConfig::default()
        };
        assert!(session.start_session(cfg).is_err());
        assert!(!session.is_session_created());
        // The engine must not have been touched
        assert_eq!(session.engine.count(&SimCall::CreateSession), 0);
    }

    #[test]
    fn test_double_create_rejected() {
        let mut session = created_session(1);
        assert!(matches!(
            session.start_session(SessionConfig::default()),
            Err(ProfilerError::SessionAlreadyCreated)
        ));
    }

    #[test]
    fn test_pass_bracketing() {
        let mut session = created_session(2);
        session.begin_pass().unwrap();
        assert!(matches!(
            session.begin_pass(),
            Err(ProfilerError::PassInProgress)
        ));
        assert!(!session.end_pass().unwrap()); // pass 1 of 2
        assert!(matches!(
            session.end_pass(),
            Err(ProfilerError::NoPassInProgress)
        ));
        session.begin_pass().unwrap();
        assert!(session.end_pass().unwrap()); // pass 2 of 2
        assert_eq!(session.pass_count(), 2);
    }

    #[test]
    fn test_ops_require_created_session() {
        let mut session = RangeProfileSession::new(SimEngine::default());
        assert!(matches!(
            session.begin_pass(),
            Err(ProfilerError::SessionNotCreated)
        ));
        assert!(matches!(
            session.enable_profiling(),
            Err(ProfilerError::SessionNotCreated)
        ));
        assert!(matches!(
            session.flush_data(),
            Err(ProfilerError::SessionNotCreated)
        ));
    }

    #[test]
    fn test_checkpoint_restore_latency_logs() {
        let mut session = created_session(1);
        session.checkpoint().unwrap();
        session.restore(false).unwrap();
        session.restore(true).unwrap();
        assert_eq!(session.ckpt_latencies().len(), 1);
        assert_eq!(session.restore_latencies().len(), 2);
    }

    #[test]
    fn test_reset_counter_data_round_trip() {
        let mut session = created_session(1);
        session.checkpoint().unwrap();
        session.begin_pass().unwrap();
        session.end_pass().unwrap();
        session.restore(true).unwrap();
        session.set_range_latency("matmul", 5.0);
        session.set_profile_aux_info(ProfileAuxInfo {
            nb_passes: 1,
            ckpt_latencies_ms: vec![1.0],
            restore_latencies_ms: vec![2.0],
        });

        session.reset_counter_data().unwrap();

        assert_eq!(session.pass_count(), 0);
        assert!(session.ckpt_latencies().is_empty());
        assert!(session.restore_latencies().is_empty());
        assert!(session.range_latencies().is_empty());
        assert_eq!(*session.profile_aux_info(), ProfileAuxInfo::default());
        assert_eq!(session.engine.count(&SimCall::ResetCounterData), 1);
    }

    #[test]
    fn test_range_latency_appends_in_order() {
        let mut session = created_session(1);
        session.set_range_latency("matmul", 5.0);
        session.set_range_latency("matmul", 7.0);
        assert_eq!(session.range_latencies()["matmul"], vec![5.0, 7.0]);
    }

    #[test]
    fn test_destroy_session() {
        let mut session = created_session(1);
        session.destroy_session().unwrap();
        assert!(!session.is_session_created());
        assert!(session.destroy_session().is_err());
    }
}
