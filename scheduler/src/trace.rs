//! Buffered region trace and open-region correlation
//!
//! Completed regions land here in report order; queries slice them by time
//! window or recency. The open set tracks regions each capsule has opened
//! but not yet closed: a close report that matches nothing means the
//! capsule and scheduler have desynchronized, which is fatal for that
//! interaction rather than silently dropped.

use crate::errors::SchedulerError;
use gpuscope_shared::types::region::{RegionEvent, RegionHash, TimestampMs};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::debug;

/// A region a capsule has opened and not yet closed. `depth` covers
/// re-entrant opens of the same declared region.
#[derive(Debug, Clone)]
struct OpenRegion {
    name: String,
    depth: usize,
}

/// In-memory region trace. Thread-safe; drops oldest events at capacity.
pub struct RegionTrace {
    max_events: usize,
    events: RwLock<VecDeque<RegionEvent>>,
    open: Mutex<HashMap<(u32, RegionHash), OpenRegion>>,
}

impl RegionTrace {
    /// Create a trace that keeps at most `max_events` completed regions.
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            events: RwLock::new(VecDeque::with_capacity(max_events.min(4096))),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `pid` opened the declared region `begin_hash`.
    pub fn note_open(&self, pid: u32, begin_hash: RegionHash, name: &str) {
        let mut open = self.open.lock().expect("open set poisoned");
        open.entry((pid, begin_hash))
            .and_modify(|r| r.depth += 1)
            .or_insert_with(|| OpenRegion {
                name: name.to_string(),
                depth: 1,
            });
    }

    /// Correlate a close report against the open set and buffer the
    /// completed event. Matching uses `begin_hash` only; `end_hash` is
    /// diagnostic.
    pub fn complete(&self, pid: u32, event: RegionEvent) -> Result<(), SchedulerError> {
        {
            let mut open = self.open.lock().expect("open set poisoned");
            let key = (pid, event.begin_hash);
            match open.get_mut(&key) {
                None => return Err(SchedulerError::UnmatchedRegion(event.begin_hash)),
                Some(region) if region.depth > 1 => region.depth -= 1,
                Some(_) => {
                    open.remove(&key);
                }
            }
        }

        debug!(
            pid,
            name = %event.name,
            begin_hash = format_args!("{:#018x}", event.begin_hash),
            span_ms = event.span_ms(),
            "region completed"
        );

        let mut events = self.events.write().expect("region trace poisoned");
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
        Ok(())
    }

    /// All regions whose completion timestamp lies in `[start_ms, end_ms)`,
    /// in nondecreasing completion order. Reports from independent capsules
    /// may interleave, so the slice is sorted before returning.
    pub fn window(&self, start_ms: TimestampMs, end_ms: TimestampMs) -> Vec<RegionEvent> {
        let events = self.events.read().expect("region trace poisoned");
        let mut out: Vec<RegionEvent> = events
            .iter()
            .filter(|e| e.completed_ms >= start_ms && e.completed_ms < end_ms)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.completed_ms);
        out
    }

    /// The most recent `max_num_events` completed regions, newest last.
    pub fn recent(&self, max_num_events: usize) -> Vec<RegionEvent> {
        let events = self.events.read().expect("region trace poisoned");
        let skip = events.len().saturating_sub(max_num_events);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of buffered completed regions.
    pub fn len(&self) -> usize {
        self.events.read().expect("region trace poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget the open set of a departed capsule.
    pub fn drop_capsule(&self, pid: u32) {
        let mut open = self.open.lock().expect("open set poisoned");
        open.retain(|(p, _), region| {
            if *p == pid {
                debug!(pid, name = %region.name, "discarding open region of departed capsule");
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuscope_shared::types::region::region_hash;

    fn event(name: &str, location: &str, started_ms: u64, completed_ms: u64) -> RegionEvent {
        RegionEvent {
            name: name.to_string(),
            begin_hash: region_hash(location),
            end_hash: region_hash(location),
            begin_location: location.to_string(),
            end_location: location.to_string(),
            started_ms,
            completed_ms,
        }
    }

    fn trace_with(events: &[RegionEvent]) -> RegionTrace {
        let trace = RegionTrace::new(1024);
        for e in events {
            trace.note_open(1, e.begin_hash, &e.name);
            trace.complete(1, e.clone()).unwrap();
        }
        trace
    }

    #[test]
    fn test_unmatched_close_is_error() {
        let trace = RegionTrace::new(16);
        let e = event("orphan", "a.py:10", 0, 5);
        let result = trace.complete(1, e.clone());
        assert!(matches!(result, Err(SchedulerError::UnmatchedRegion(h)) if h == e.begin_hash));
        assert!(trace.is_empty());
    }

    #[test]
    fn test_open_close_from_wrong_pid_is_error() {
        let trace = RegionTrace::new(16);
        let e = event("matmul", "a.py:10", 0, 5);
        trace.note_open(1, e.begin_hash, "matmul");
        assert!(trace.complete(2, e).is_err());
    }

    #[test]
    fn test_reentrant_open_needs_matching_closes() {
        let trace = RegionTrace::new(16);
        let e = event("recurse", "a.py:10", 0, 5);
        trace.note_open(1, e.begin_hash, "recurse");
        trace.note_open(1, e.begin_hash, "recurse");
        trace.complete(1, e.clone()).unwrap();
        trace.complete(1, e.clone()).unwrap();
        assert!(trace.complete(1, e).is_err());
    }

    #[test]
    fn test_window_bounds_are_half_open() {
        let trace = trace_with(&[
            event("a", "f.py:1", 0, 10),
            event("b", "f.py:2", 5, 20),
            event("c", "f.py:3", 15, 30),
        ]);
        let hits = trace.window(10, 30);
        assert_eq!(
            hits.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(trace.window(31, 100).is_empty());
        assert!(trace.window(10, 10).is_empty());
    }

    #[test]
    fn test_window_sorts_interleaved_completions() {
        // Reports from two capsules may arrive out of completion order
        let trace = RegionTrace::new(16);
        for (pid, e) in [
            (1u32, event("late", "f.py:1", 0, 50)),
            (2u32, event("early", "g.py:1", 0, 10)),
            (1u32, event("mid", "f.py:2", 0, 30)),
        ] {
            trace.note_open(pid, e.begin_hash, &e.name);
            trace.complete(pid, e).unwrap();
        }
        let hits = trace.window(0, 100);
        assert_eq!(
            hits.iter().map(|e| e.completed_ms).collect::<Vec<_>>(),
            vec![10, 30, 50]
        );
    }

    #[test]
    fn test_recent_returns_newest_last() {
        let trace = trace_with(&[
            event("a", "f.py:1", 0, 10),
            event("b", "f.py:2", 0, 20),
            event("c", "f.py:3", 0, 30),
        ]);
        let hits = trace.recent(2);
        assert_eq!(
            hits.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
        // Bound larger than the trace returns everything
        assert_eq!(trace.recent(10).len(), 3);
        assert!(trace.recent(0).is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let trace = RegionTrace::new(2);
        for i in 0..4u64 {
            let e = event(&format!("r{}", i), &format!("f.py:{}", i), 0, i * 10);
            trace.note_open(1, e.begin_hash, &e.name);
            trace.complete(1, e).unwrap();
        }
        assert_eq!(trace.len(), 2);
        let names: Vec<_> = trace.recent(10).iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["r2", "r3"]);
    }

    #[test]
    fn test_drop_capsule_clears_open_set() {
        let trace = RegionTrace::new(16);
        let e = event("left-open", "a.py:10", 0, 5);
        trace.note_open(1, e.begin_hash, "left-open");
        trace.drop_capsule(1);
        assert!(trace.complete(1, e).is_err());
    }
}
