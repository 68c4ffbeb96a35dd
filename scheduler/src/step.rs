//! Stepwise control command dispatch
//!
//! `execute_step` is the scheduler's control surface: `record_range` slices
//! the buffered region trace, `profile_range` drives capsules through a
//! counter-collection pass and gathers the snapshots. Malformed kwargs fail
//! immediately with `InvalidArgument`; nothing is retried.

use crate::errors::SchedulerError;
use crate::Scheduler;
use gpuscope_shared::types::region::RegionEvent;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Keyword arguments for `execute_step`. Exactly one argument shape must be
/// populated per step kind.
#[derive(Debug, Clone, Default)]
pub struct StepArgs {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub max_num_events: Option<usize>,
    pub list_events: Option<Vec<String>>,
    pub list_metric_names: Option<Vec<String>>,
}

impl StepArgs {
    /// `record_range` over a completion-time window `[start_ms, end_ms)`.
    pub fn window(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
            ..Self::default()
        }
    }

    /// `record_range` bounded by event count.
    pub fn max_events(max_num_events: usize) -> Self {
        Self {
            max_num_events: Some(max_num_events),
            ..Self::default()
        }
    }

    /// `profile_range` over named regions and hardware counters.
    pub fn profile(list_events: Vec<String>, list_metric_names: Vec<String>) -> Self {
        Self {
            list_events: Some(list_events),
            list_metric_names: Some(list_metric_names),
            ..Self::default()
        }
    }
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Retained event trace, oldest first
    Events(Vec<RegionEvent>),

    /// Counter snapshots: region name → metric name → value
    Counters(BTreeMap<String, BTreeMap<String, f64>>),
}

/// Pending and completed `profile_range` work.
///
/// A registered plan turns the next close report of each listed region into
/// an `Instruction::Reconfigure`; the capsule's counter snapshot resolves
/// that region's entry.
#[derive(Default)]
pub struct ProfilePlan {
    pending: Mutex<HashMap<String, Vec<String>>>,
    results: Mutex<BTreeMap<String, BTreeMap<String, f64>>>,
    notify: Notify,
}

impl ProfilePlan {
    /// Mark regions for counter collection.
    pub fn register(&self, list_events: &[String], list_metric_names: &[String]) {
        let mut pending = self.pending.lock().expect("profile plan poisoned");
        for name in list_events {
            pending.insert(name.clone(), list_metric_names.to_vec());
        }
    }

    /// Metric names to reconfigure a closing region with, if it is marked.
    /// The mark stays until a snapshot arrives, so a capsule that closes the
    /// region again before reporting counters is re-instructed.
    pub fn reconfigure_metrics(&self, region_name: &str) -> Option<Vec<String>> {
        self.pending
            .lock()
            .expect("profile plan poisoned")
            .get(region_name)
            .cloned()
    }

    /// Accept a counter snapshot from a capsule.
    pub fn record(&self, region_name: &str, metrics: Vec<(String, f64)>) {
        self.pending
            .lock()
            .expect("profile plan poisoned")
            .remove(region_name);
        self.results
            .lock()
            .expect("profile plan poisoned")
            .insert(region_name.to_string(), metrics.into_iter().collect());
        self.notify.notify_waiters();
    }

    /// Most recent snapshot for a region, if any. Feeds the watch-policy
    /// `watch()` primitive.
    pub fn latest(&self, region_name: &str) -> Option<BTreeMap<String, f64>> {
        self.results
            .lock()
            .expect("profile plan poisoned")
            .get(region_name)
            .cloned()
    }

    /// Wait until every listed region has a snapshot. With `deadline: None`
    /// this waits forever, mirroring the barrier semantics.
    pub async fn collect(
        &self,
        list_events: &[String],
        deadline: Option<Duration>,
    ) -> Result<BTreeMap<String, BTreeMap<String, f64>>, SchedulerError> {
        let wait = self.collect_inner(list_events);
        match deadline {
            None => Ok(wait.await),
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                let results = self.results.lock().expect("profile plan poisoned");
                let missing = list_events
                    .iter()
                    .filter(|name| !results.contains_key(*name))
                    .cloned()
                    .collect();
                SchedulerError::StepTimeout(missing)
            }),
        }
    }

    async fn collect_inner(
        &self,
        list_events: &[String],
    ) -> BTreeMap<String, BTreeMap<String, f64>> {
        loop {
            let notified = self.notify.notified();
            {
                let results = self.results.lock().expect("profile plan poisoned");
                if list_events.iter().all(|name| results.contains_key(name)) {
                    return list_events
                        .iter()
                        .map(|name| (name.clone(), results[name].clone()))
                        .collect();
                }
            }
            notified.await;
        }
    }
}

impl Scheduler {
    /// Dispatch one control step. See [`StepArgs`] for the two argument
    /// shapes of `record_range`; `profile_range` requires both lists.
    pub async fn execute_step(
        &self,
        step_name: &str,
        args: StepArgs,
    ) -> Result<StepOutcome, SchedulerError> {
        match step_name {
            "record_range" => {
                let window_shape = args.start_ms.is_some() || args.end_ms.is_some();
                let count_shape = args.max_num_events.is_some();
                match (window_shape, count_shape) {
                    (true, false) => {
                        let (start_ms, end_ms) = match (args.start_ms, args.end_ms) {
                            (Some(s), Some(e)) => (s, e),
                            _ => {
                                return Err(SchedulerError::InvalidArgument(
                                    "record_range window shape needs both start_ms and end_ms"
                                        .to_string(),
                                ))
                            }
                        };
                        Ok(StepOutcome::Events(self.trace().window(start_ms, end_ms)))
                    }
                    (false, true) => {
                        let k = args.max_num_events.unwrap_or_default();
                        Ok(StepOutcome::Events(self.trace().recent(k)))
                    }
                    _ => Err(SchedulerError::InvalidArgument(
                        "record_range takes either (start_ms, end_ms) or max_num_events"
                            .to_string(),
                    )),
                }
            }
            "profile_range" => {
                let list_events = args.list_events.ok_or_else(|| {
                    SchedulerError::InvalidArgument(
                        "profile_range requires list_events".to_string(),
                    )
                })?;
                let list_metric_names = args.list_metric_names.ok_or_else(|| {
                    SchedulerError::InvalidArgument(
                        "profile_range requires list_metric_names".to_string(),
                    )
                })?;
                self.plan().register(&list_events, &list_metric_names);
                let counters = self
                    .plan()
                    .collect(&list_events, self.config().step_deadline)
                    .await?;
                Ok(StepOutcome::Counters(counters))
            }
            other => Err(SchedulerError::InvalidArgument(format!(
                "unknown step: {}",
                other
            ))),
        }
    }
}
