use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::DEFAULT_MAX_CONCURRENT_TASKS;
use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;

/// Counting admission control for running tasks. Clones share the same slots.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One admitted slot. Returned to the gate exactly once, on `release` or drop.
#[derive(Debug)]
pub struct GateSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GateStats {
    pub capacity: usize,
    pub available: usize,
    pub in_use: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> OrchestrationResult<Self> {
        if capacity == 0 {
            return Err(CoreError::invalid_input(
                "concurrency gate capacity must be greater than zero",
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(CoreError::invalid_input(format!(
                "concurrency gate capacity {capacity} exceeds the maximum of {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub async fn acquire(&self) -> OrchestrationResult<GateSlot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "concurrency gate closed"))?;
        Ok(GateSlot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> GateStats {
        let available = self.semaphore.available_permits();
        GateStats {
            capacity: self.capacity,
            available,
            in_use: self.capacity.saturating_sub(available),
        }
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_TASKS)),
            capacity: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl GateSlot {
    pub fn release(self) {}
}
