//! Bound on concurrent GPU submissions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Counting semaphore sized from available parallelism.
///
/// Acquiring a permit is the only point where the video path waits. A permit
/// is released when its [`InflightPermit`] is dropped, which happens exactly
/// once whether the operation succeeded, failed or was abandoned.
#[derive(Clone)]
pub struct InflightBudget {
    semaphore: Arc<Semaphore>,
    budget: Arc<AtomicUsize>,
    /// Permits to retire as they come back after a shrink.
    debt: Arc<AtomicUsize>,
}

/// One unit of the inflight budget.
#[derive(Debug)]
pub struct InflightPermit {
    permit: Option<OwnedSemaphorePermit>,
    debt: Arc<AtomicUsize>,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        let retire = self
            .debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok();
        if retire {
            if let Some(permit) = self.permit.take() {
                permit.forget();
            }
        }
    }
}

impl InflightBudget {
    pub const MIN: usize = 2;
    pub const MAX: usize = 8;

    /// Create a budget of `requested` permits, or one per CPU when `None`,
    /// clamped into [`MIN`](Self::MIN)..=[`MAX`](Self::MAX).
    pub fn new(requested: Option<usize>) -> Self {
        let budget = Self::resolve(requested);
        Self {
            semaphore: Arc::new(Semaphore::new(budget)),
            budget: Arc::new(AtomicUsize::new(budget)),
            debt: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Budget that `requested` resolves to.
    pub fn resolve(requested: Option<usize>) -> usize {
        requested
            .unwrap_or_else(num_cpus::get)
            .clamp(Self::MIN, Self::MAX)
    }

    /// Wait for a permit. Returns `None` once the budget has been closed.
    pub async fn acquire(&self) -> Option<InflightPermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        Some(self.wrap(permit))
    }

    /// Take a permit without waiting.
    pub fn try_acquire(&self) -> Option<InflightPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.wrap(permit))
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> InflightPermit {
        InflightPermit {
            permit: Some(permit),
            debt: Arc::clone(&self.debt),
        }
    }

    /// Change the number of permits. Growth is immediate; shrinking retires
    /// free permits now and held ones as they are released.
    pub fn resize(&self, requested: Option<usize>) {
        let new_budget = Self::resolve(requested);
        let old_budget = self.budget.swap(new_budget, Ordering::AcqRel);
        if new_budget > old_budget {
            let growth = new_budget - old_budget;
            let cancelled = self.cancel_debt(growth);
            self.semaphore.add_permits(growth - cancelled);
        } else if new_budget < old_budget {
            let excess = old_budget - new_budget;
            let forgotten = self.semaphore.forget_permits(excess);
            self.debt.fetch_add(excess - forgotten, Ordering::AcqRel);
        }
        debug!("Inflight budget {} -> {}", old_budget, new_budget);
    }

    /// Drop up to `n` pending retirements; returns how many were dropped.
    fn cancel_debt(&self, n: usize) -> usize {
        match self
            .debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d - d.min(n)))
        {
            Ok(previous) | Err(previous) => previous.min(n),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget.load(Ordering::Acquire)
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn held(&self) -> usize {
        self.budget().saturating_sub(self.available())
    }

    /// Wake every waiter with `None` and refuse new acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
