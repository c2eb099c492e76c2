//! Bounds the number of records being generated and submitted at once.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// A counting limiter handing out at most `capacity` slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    state: Arc<LimiterState>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct LimiterState {
    active: AtomicUsize,
    high_watermark: AtomicUsize,
}

/// A held slot. The slot is released when this value is dropped, which
/// happens on every exit path of the task that owns it, panics included.
#[derive(Debug)]
#[must_use = "the slot is released as soon as it is dropped"]
pub struct LimiterSlot {
    _permit: OwnedSemaphorePermit,
    state: Arc<LimiterState>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with `capacity` slots. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Arc::default(),
            capacity,
        }
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` if the token is cancelled first.
    pub async fn acquire(&self, ct: &CancellationToken) -> Option<LimiterSlot> {
        let permit = tokio::select! {
            biased;
            _ = ct.cancelled() => return None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
        };

        let active = self.state.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.state
            .high_watermark
            .fetch_max(active, Ordering::AcqRel);

        Some(LimiterSlot {
            _permit: permit,
            state: self.state.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    /// Largest number of slots held at the same time so far.
    pub fn high_watermark(&self) -> usize {
        self.state.high_watermark.load(Ordering::Acquire)
    }
}

impl Drop for LimiterSlot {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(4);
        let ct = CancellationToken::new();
        let mut tasks = Vec::new();

        for _ in 0..32 {
            let slot = limiter.acquire(&ct).await.expect("slot");
            assert!(limiter.active() <= 4);
            tasks.push(tokio::spawn(async move {
                let _slot = slot;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(limiter.active(), 0);
        assert!(limiter.high_watermark() <= 4);
        assert!(limiter.high_watermark() >= 1);
    }

    #[tokio::test]
    async fn test_slot_released_on_panic() {
        let limiter = ConcurrencyLimiter::new(1);
        let ct = CancellationToken::new();

        let slot = limiter.acquire(&ct).await.expect("slot");
        let task = tokio::spawn(async move {
            let _slot = slot;
            panic!("task failed");
        });
        assert!(task.await.is_err());

        assert_eq!(limiter.active(), 0);
        assert!(limiter.acquire(&ct).await.is_some());
    }

    #[tokio::test]
    async fn test_acquire_is_cancellable() {
        let limiter = ConcurrencyLimiter::new(1);
        let ct = CancellationToken::new();

        let _held = limiter.acquire(&ct).await.expect("slot");
        ct.cancel();

        assert!(limiter.acquire(&ct).await.is_none());
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
