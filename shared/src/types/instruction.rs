//! Scheduler-to-capsule instructions
//!
//! Returned by the blocking correlation handoff: a capsule reports a closed
//! region and stalls until the scheduler answers with one of these.

use serde::{Deserialize, Serialize};

/// Scheduling decision for a capsule blocked on a region boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Resume execution
    Continue,

    /// Stop the profiled workload
    Stop,

    /// Re-run the region under counter collection for the named metrics,
    /// then report a counter snapshot
    Reconfigure { metric_names: Vec<String> },
}

impl Instruction {
    /// Whether the capsule should keep executing after this instruction.
    pub fn should_continue(&self) -> bool {
        !matches!(self, Instruction::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_continue() {
        assert!(Instruction::Continue.should_continue());
        assert!(Instruction::Reconfigure {
            metric_names: vec!["sm__warps_active.avg".to_string()]
        }
        .should_continue());
        assert!(!Instruction::Stop.should_continue());
    }
}
