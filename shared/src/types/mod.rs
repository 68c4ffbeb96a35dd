//! Core data types shared between the scheduler and capsules

pub mod instruction;
pub mod region;
