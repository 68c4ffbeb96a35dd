//! Wire protocol for scheduler-capsule communication

pub mod wire;
