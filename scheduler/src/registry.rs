//! Capsule registry and world-size barrier
//!
//! The scheduler owns the mapping from process identity to capsule; its
//! cardinality is the capsule world size. The barrier is notification-based
//! (a watch channel carrying the current world size) with an optional
//! deadline, defaulting to wait-forever.

use crate::errors::SchedulerError;
use gpuscope_shared::utils::time::system_time_millis;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// One connected capsule process.
#[derive(Debug, Clone)]
pub struct CapsuleProcess {
    pub pid: u32,
    pub registered_at_ms: u64,
    pub alive: bool,
}

/// Thread-safe registry of live capsules. Insert on handshake, remove on
/// disconnect, read on world-size query; safe under concurrent handshakes.
pub struct CapsuleRegistry {
    inner: RwLock<HashMap<u32, CapsuleProcess>>,
    world_tx: watch::Sender<usize>,
}

impl Default for CapsuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapsuleRegistry {
    pub fn new() -> Self {
        let (world_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(HashMap::new()),
            world_tx,
        }
    }

    /// Accept a capsule handshake.
    pub fn register(&self, pid: u32) {
        let mut inner = self.inner.write().expect("capsule registry poisoned");
        inner.insert(
            pid,
            CapsuleProcess {
                pid,
                registered_at_ms: system_time_millis(),
                alive: true,
            },
        );
        let size = inner.values().filter(|c| c.alive).count();
        drop(inner);
        info!(pid, world_size = size, "capsule registered");
        // send_replace updates the value even when no waiter is subscribed
        // yet; plain send would drop the update and strand later waiters.
        self.world_tx.send_replace(size);
    }

    /// Remove a capsule on process termination or orderly goodbye.
    pub fn deregister(&self, pid: u32) {
        let mut inner = self.inner.write().expect("capsule registry poisoned");
        if inner.remove(&pid).is_none() {
            return;
        }
        let size = inner.values().filter(|c| c.alive).count();
        drop(inner);
        info!(pid, world_size = size, "capsule deregistered");
        self.world_tx.send_replace(size);
    }

    /// Current count of connected, alive capsules.
    pub fn world_size(&self) -> usize {
        self.inner
            .read()
            .expect("capsule registry poisoned")
            .values()
            .filter(|c| c.alive)
            .count()
    }

    pub fn get(&self, pid: u32) -> Option<CapsuleProcess> {
        self.inner
            .read()
            .expect("capsule registry poisoned")
            .get(&pid)
            .cloned()
    }

    /// Block until the world size reaches `want`. Unblocks the instant the
    /// n-th capsule registers. With `deadline: None` this waits forever.
    pub async fn wait_for_world_size(
        &self,
        want: usize,
        deadline: Option<Duration>,
    ) -> Result<(), SchedulerError> {
        let wait = self.wait_inner(want);
        match deadline {
            None => {
                wait.await;
                Ok(())
            }
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                SchedulerError::BarrierTimeout {
                    want,
                    have: self.world_size(),
                }
            }),
        }
    }

    async fn wait_inner(&self, want: usize) {
        let mut rx = self.world_tx.subscribe();
        loop {
            if *rx.borrow_and_update() >= want {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as the registry; unreachable in
                // practice, but never spin.
                return;
            }
        }
    }
}
