//! The per-entry binary gate.
//!
//! A [`Gate`] is a semaphore with a single permit, used in two distinct ways:
//!
//! - [`Gate::acquire_exclusive`] holds the gate for the lifetime of the returned [`GateGuard`].
//!   The population of an entry and every [`EntryStream`](crate::EntryStream) hold it this way.
//! - [`Gate::await_completion`] acquires and immediately releases the gate. Single-flight joiners
//!   use it as a completion signal for a running population, it does not serialize the joiners.
//!
//! Closing a gate wakes all waiters. Exclusive acquisition fails afterwards, while waiting for
//! completion returns immediately.
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::CacheError;

#[derive(Debug)]
pub(crate) struct Gate {
    semaphore: Arc<Semaphore>,
}

impl Gate {
    /// Creates a gate that is held by the returned guard.
    pub fn held() -> (Self, GateGuard) {
        let semaphore = Arc::new(Semaphore::new(0));
        let guard = GateGuard {
            semaphore: Arc::clone(&semaphore),
        };
        (Self { semaphore }, guard)
    }

    /// Waits until the gate is free and holds it until the guard is dropped.
    pub async fn acquire_exclusive(&self) -> Result<GateGuard, CacheError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CacheError::Disposed)?;
        permit.forget();
        Ok(GateGuard {
            semaphore: Arc::clone(&self.semaphore),
        })
    }

    /// Waits until the current holder releases the gate.
    pub async fn await_completion(&self) {
        // dropping the permit right away hands the gate to the next waiter
        let _permit = self.semaphore.acquire().await;
    }

    /// Returns `true` if the gate is currently held.
    pub fn is_held(&self) -> bool {
        self.semaphore.available_permits() == 0 && !self.semaphore.is_closed()
    }

    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Releases the [`Gate`] when dropped.
#[derive(Debug)]
pub(crate) struct GateGuard {
    semaphore: Arc<Semaphore>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.semaphore.add_permits(1);
    }
}
