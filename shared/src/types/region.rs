//! Region identity and completed-region trace events
//!
//! A region is a user-declared instrumentation window identified by a stable
//! 64-bit hash of its source location. Two region instances reported from
//! independent invocations (or independent processes) are the *same declared
//! region* iff their `begin_hash` values match; `end_hash` is diagnostic
//! only and never participates in matching.

use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since UNIX epoch
pub type TimestampMs = u64;

/// 64-bit region identity hash
pub type RegionHash = u64;

/// Hash a source location string (`file:line`) into a 64-bit region
/// identity: the first 8 bytes of the BLAKE3 digest, big-endian.
///
/// Collisions are treated as "same region" by design; the probability is
/// negligible under a 256-bit digest truncated to 64 bits.
pub fn region_hash(location: &str) -> RegionHash {
    let digest = blake3::hash(location.as_bytes());
    let bytes = digest.as_bytes();
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// A completed region instance as reported by a capsule at close time.
///
/// `begin_location` and `end_location` may differ textually: a region can be
/// opened in one place and closed in another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEvent {
    /// Human-readable region name
    pub name: String,

    /// Identity hash of the opening call site
    pub begin_hash: RegionHash,

    /// Hash of the closing call site (diagnostic only)
    pub end_hash: RegionHash,

    /// Opening call site, `file:line`
    pub begin_location: String,

    /// Closing call site, `file:line`
    pub end_location: String,

    /// When the region was opened
    pub started_ms: TimestampMs,

    /// When the region was closed
    pub completed_ms: TimestampMs,
}

impl RegionEvent {
    /// Wall-clock span of this region instance in milliseconds.
    pub fn span_ms(&self) -> u64 {
        self.completed_ms.saturating_sub(self.started_ms)
    }
}

/// A single counter snapshot for one region, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub region_name: String,
    pub metrics: Vec<(String, f64)>,
}
