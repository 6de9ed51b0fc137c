//! # Batch Pool
//!
//! Fixed-capacity slot pool capping concurrent page fetches.
//!
//! A slot is an RAII [`SlotPermit`]: acquiring one marks a batch started,
//! dropping it (or passing it to [`BatchPool::release_slot`]) marks the batch
//! complete and frees the slot. [`BatchPool::await_all_complete`] waits until
//! every started batch has finished.
//!
//! ```ignore
//! let pool = BatchPool::new(5);
//! for offset in offsets {
//!     pool.spawn(fetch_page(offset)).await?;
//! }
//! pool.await_all_complete().await;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::{Result, SyncError};

/// Default number of slots
pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub started: u64,
    pub completed: u64,
}

impl PoolCounters {
    pub fn in_flight(&self) -> u64 {
        self.started - self.completed
    }
}

#[derive(Clone)]
pub struct BatchPool {
    capacity: usize,
    slots: Arc<Semaphore>,
    counters: Arc<watch::Sender<PoolCounters>>,
}

impl BatchPool {
    /// Create a pool; a capacity of 0 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (counters, _) = watch::channel(PoolCounters::default());
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            counters: Arc::new(counters),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot and mark a batch started
    pub async fn acquire_slot(&self) -> Result<SlotPermit> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|e| SyncError::TaskFailed(format!("batch pool closed: {e}")))?;

        self.counters.send_modify(|c| c.started += 1);
        trace!(in_flight = self.in_flight(), "Batch slot acquired");

        Ok(SlotPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Mark a batch complete and free its slot
    pub fn release_slot(&self, permit: SlotPermit) {
        drop(permit);
    }

    /// Wait until every started batch has completed
    pub async fn await_all_complete(&self) {
        let mut rx = self.counters.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|c| c.in_flight() == 0).await;
    }

    /// Acquire a slot, then run `future` on the runtime while holding it
    pub async fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.acquire_slot().await?;
        Ok(tokio::spawn(async move {
            let output = future.await;
            drop(permit);
            output
        }))
    }

    pub fn in_flight(&self) -> u64 {
        self.counters.borrow().in_flight()
    }

    pub fn counters(&self) -> PoolCounters {
        *self.counters.borrow()
    }
}

impl Default for BatchPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A held slot; dropping it marks the batch complete
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<watch::Sender<PoolCounters>>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.counters.send_modify(|c| c.completed += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Start and end of each batch, keyed by page offset
    type Spans = Vec<(u64, Instant, Instant)>;

    /// Run the pages at offsets 0 and 500 through a pool of `capacity`
    async fn run_two_batches(capacity: usize) -> (usize, Spans) {
        let pool = BatchPool::new(capacity);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let spans = Arc::new(Mutex::new(Vec::new()));

        for offset in [0u64, 500] {
            let active = active.clone();
            let peak = peak.clone();
            let spans = spans.clone();
            pool.spawn(async move {
                let started = Instant::now();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                spans.lock().unwrap().push((offset, started, Instant::now()));
            })
            .await
            .unwrap();
        }

        pool.await_all_complete().await;
        assert_eq!(active.load(Ordering::SeqCst), 0);
        let mut spans = spans.lock().unwrap().clone();
        assert_eq!(spans.len(), 2, "await_all_complete returned early");
        spans.sort_by_key(|(offset, _, _)| *offset);
        (peak.load(Ordering::SeqCst), spans)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = BatchPool::new(2);
        let a = pool.acquire_slot().await.unwrap();
        let b = pool.acquire_slot().await.unwrap();
        assert_eq!(pool.in_flight(), 2);

        pool.release_slot(a);
        drop(b);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(
            pool.counters(),
            PoolCounters {
                started: 2,
                completed: 2
            }
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised() {
        assert_eq!(BatchPool::new(0).capacity(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let pool = BatchPool::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let active = active.clone();
            let peak = peak.clone();
            pool.spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.await_all_complete().await;
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.counters().completed, 12);
    }

    #[tokio::test]
    async fn test_await_all_waits_for_running_batches() {
        let pool = BatchPool::new(5);
        let finished = Arc::new(AtomicUsize::new(0));

        for delay in [30u64, 60] {
            let finished = finished.clone();
            pool.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.await_all_complete().await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_slot_runs_batches_in_sequence() {
        let (peak, spans) = run_two_batches(1).await;
        assert_eq!(peak, 1);

        let (_, _, first_end) = spans[0];
        let (_, second_start, _) = spans[1];
        assert!(second_start >= first_end);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spare_slots_run_batches_together() {
        let (peak, spans) = run_two_batches(5).await;
        assert_eq!(peak, 2);

        let (_, first_start, first_end) = spans[0];
        let (_, second_start, second_end) = spans[1];
        assert!(second_start < first_end);
        assert!(first_start < second_end);
    }

    #[tokio::test]
    async fn test_await_all_on_idle_pool_returns() {
        BatchPool::default().await_all_complete().await;
    }
}
