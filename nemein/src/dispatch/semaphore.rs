//! Counting gate for per-instance execution slots.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A reserved execution slot. Dropping the permit returns the slot; a slot
/// can therefore never be returned more often than it was taken.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

/// Counting semaphore with a fixed capacity.
///
/// Thin wrapper over [`tokio::sync::Semaphore`] that pins the capacity at
/// construction and hands out RAII [`Permit`]s. The inner semaphore is
/// never closed.
#[derive(Debug)]
pub struct BoundedSemaphore {
    inner: Arc<Semaphore>,
    capacity: usize,
}

impl BoundedSemaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    /// Waits until a slot is free. Waiters queue fairly, so no acquirer
    /// starves while others cycle permits.
    pub async fn acquire(&self) -> Permit {
        let permit = Arc::clone(&self.inner)
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        Permit { _inner: permit }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    pub async fn try_acquire(&self, timeout: Duration) -> Option<Permit> {
        tokio::time::timeout(timeout, self.acquire()).await.ok()
    }
}
