use std::future::Future;

use tokio::sync::Semaphore;

/// Admits at most one concurrent execution of the expensive generation
/// work, rejecting overlapping attempts instead of queuing them.
///
/// The busy flag is a single semaphore permit: acquisition is the
/// atomic check-and-set, and the RAII permit guarantees the flag is
/// cleared on every exit path, so a failed or timed-out run can never
/// leave the coordinator stuck busy.
#[derive(Debug)]
pub struct SingleFlight {
    slot: Semaphore,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            slot: Semaphore::new(1),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Runs `work` if no other work is active; returns `None` without
    /// polling `work` when busy.
    pub async fn try_run<F>(&self, work: F) -> Option<F::Output>
    where
        F: Future,
    {
        let _permit = self.slot.try_acquire().ok()?;
        Some(work.await)
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}
