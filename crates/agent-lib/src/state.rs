//! Shared controller state
//!
//! The control loop publishes a complete snapshot after every tick; API
//! handlers read whatever snapshot is current without ever blocking the
//! loop.

use crate::models::ControllerSnapshot;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Cheaply clonable handle to the latest controller snapshot.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<ArcSwap<ControllerSnapshot>>,
}

impl StateHandle {
    pub fn new(initial: ControllerSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Atomically replace the published snapshot.
    pub fn publish(&self, snapshot: ControllerSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }

    /// The current snapshot. Readers hold an `Arc`, so a concurrent
    /// publish never invalidates what they are looking at.
    pub fn load(&self) -> Arc<ControllerSnapshot> {
        self.inner.load_full()
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new(ControllerSnapshot::default())
    }
}
