//! Read-only device and context queries
//!
//! Static device properties feed watch policies (launch-scale and
//! register-pressure heuristics); clock frequencies are informational.
//! Neither has a mutation contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static properties of one GPU device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceProps {
    pub device_id: u32,
    pub name: String,
    pub num_sms: u32,
    pub smem_per_sm_bytes: u64,
    pub regs_per_sm: u32,
    pub max_blocks_per_sm: u32,
}

/// Static launch properties of one kernel, as seen by watch policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelProps {
    pub name: String,
    pub grid_size: u64,
    pub static_smem_bytes: u64,
    pub num_regs: u32,
}

/// Device/context enumeration exposed by the engine. Read-only.
pub trait DeviceQuery {
    fn devices(&self) -> Vec<DeviceProps>;

    /// Clock frequency per domain (e.g. "sm", "mem") in kHz.
    fn clock_freq(&self, device_id: u32) -> anyhow::Result<BTreeMap<String, u64>>;
}

impl DeviceQuery for crate::engine::SimEngine {
    fn devices(&self) -> Vec<DeviceProps> {
        vec![DeviceProps {
            device_id: 0,
            name: "sim-device".to_string(),
            num_sms: 80,
            smem_per_sm_bytes: 164 * 1024,
            regs_per_sm: 65_536,
            max_blocks_per_sm: 32,
        }]
    }

    fn clock_freq(&self, device_id: u32) -> anyhow::Result<BTreeMap<String, u64>> {
        anyhow::ensure!(device_id == 0, "unknown device {}", device_id);
        Ok(BTreeMap::from([
            ("sm".to_string(), 1_410_000u64),
            ("mem".to_string(), 1_215_000u64),
        ]))
    }
}
