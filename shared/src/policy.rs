//! Watch-policy plugin ABI
//!
//! A watch policy decides, per reported region, what profiling action to
//! take next. User policies are WASM modules; the scheduler serializes a
//! `PolicyInput` into the module's linear memory and reads a `PolicyVerdict`
//! back. Both sides use plain bincode for the ABI payloads.

use crate::types::region::RegionEvent;
use serde::{Deserialize, Serialize};

/// Policy API version
pub const POLICY_API_VERSION: u32 = 1;

/// Static device properties exposed to policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDeviceInfo {
    pub device_id: u32,
    pub num_sms: u32,
    pub smem_per_sm_bytes: u64,
    pub regs_per_sm: u32,
    pub max_blocks_per_sm: u32,
}

/// Input handed to a policy's `decide` entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    /// The region that just completed
    pub event: RegionEvent,

    /// Recent completed regions, oldest first
    pub recent_events: Vec<RegionEvent>,

    /// Counter values available for the current capture window
    pub counters: Vec<(String, f64)>,

    /// Device the reporting capsule runs on, when known
    pub device: Option<PolicyDeviceInfo>,
}

/// Policy output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolicyVerdict {
    /// Nothing suspicious; let the capsule continue
    Pass,

    /// Continue, but surface a warning
    Warn(String),

    /// Stop the workload; something is wrong enough to abort
    Fail(String),
}
