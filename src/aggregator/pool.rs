//! Resizable worker pool fed by a bounded job queue.
//!
//! Every worker owns a slot index. Shrinking lowers the target and workers
//! whose slot is at or above it retire before their next dequeue. The retire
//! check and the slot release happen under the same lock `resize` uses to pick
//! slots to spawn, so the live count converges to the target exactly.
//!
//! The queue holds at most twice the largest target seen. Its bound is a
//! semaphore in front of an unbounded channel, so growing the pool grows the
//! queue with it. A feed that is queued or being processed is not queued again.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::processor::FeedProcessor;
use crate::storage::Feed;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Queued,
    /// Queue at capacity; the job is dropped for this cycle
    Full,
    /// Feed already queued or being processed
    InFlight,
    /// Pool is shutting down
    Closed,
}

struct SlotTable {
    target: usize,
    /// Queue permits granted so far
    capacity: usize,
    occupied: BTreeSet<usize>,
    next_worker_id: u64,
}

struct PoolShared {
    slots: Mutex<SlotTable>,
    target_tx: watch::Sender<usize>,
    jobs: tokio::sync::Mutex<mpsc::UnboundedReceiver<Feed>>,
    queue_permits: Semaphore,
    pending: Mutex<HashSet<i64>>,
    cancel: CancellationToken,
    processor: FeedProcessor,
    live: Arc<AtomicUsize>,
}

impl PoolShared {
    fn slots(&self) -> MutexGuard<'_, SlotTable> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release `slot` if it is beyond the target. Returns `true` if the worker
    /// must exit.
    fn retire_if_surplus(&self, slot: usize) -> bool {
        let mut table = self.slots();
        if slot >= table.target {
            table.occupied.remove(&slot);
            true
        } else {
            false
        }
    }

    fn release(&self, slot: usize) {
        self.slots().occupied.remove(&slot);
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    job_tx: Mutex<Option<mpsc::UnboundedSender<Feed>>>,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Launch `workers` workers consuming a queue of capacity `2 * workers`.
    ///
    /// `cancel` is the lifecycle scope; `live` is incremented and decremented
    /// as worker tasks start and finish.
    pub(crate) fn start(
        workers: usize,
        processor: FeedProcessor,
        cancel: CancellationToken,
        live: Arc<AtomicUsize>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (target_tx, _) = watch::channel(0);

        let pool = Self {
            shared: Arc::new(PoolShared {
                slots: Mutex::new(SlotTable {
                    target: 0,
                    capacity: 0,
                    occupied: BTreeSet::new(),
                    next_worker_id: 0,
                }),
                target_tx,
                jobs: tokio::sync::Mutex::new(job_rx),
                queue_permits: Semaphore::new(0),
                pending: Mutex::new(HashSet::new()),
                cancel,
                processor,
                live,
            }),
            job_tx: Mutex::new(Some(job_tx)),
            tracker: TaskTracker::new(),
        };
        pool.resize(workers);
        pool
    }

    /// Set the target worker count.
    ///
    /// Growing spawns workers into the free slots below the target right away
    /// and widens the queue to `2 * target`. Shrinking only lowers the target;
    /// surplus workers finish their current job and exit on their own.
    pub(crate) fn resize(&self, target: usize) {
        let mut table = self.shared.slots();
        let previous = table.target;
        table.target = target;

        let capacity = target.saturating_mul(2).max(1);
        if capacity > table.capacity {
            self.shared.queue_permits.add_permits(capacity - table.capacity);
            table.capacity = capacity;
        }

        for slot in 0..target {
            if table.occupied.insert(slot) {
                let worker_id = table.next_worker_id;
                table.next_worker_id += 1;

                self.shared.live.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&self.shared);
                self.tracker.spawn(run_worker(shared, slot, worker_id));
            }
        }
        drop(table);

        self.shared.target_tx.send_replace(target);
        tracing::debug!(from = previous, to = target, "Worker pool resized");
    }

    /// Enqueue a job without waiting for queue space.
    pub(crate) fn dispatch(&self, feed: Feed) -> Dispatch {
        let guard = self.job_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Dispatch::Closed;
        };

        let feed_id = feed.id;
        if !self.shared.pending().insert(feed_id) {
            return Dispatch::InFlight;
        }
        let Ok(permit) = self.shared.queue_permits.try_acquire() else {
            self.shared.pending().remove(&feed_id);
            return Dispatch::Full;
        };

        match tx.send(feed) {
            Ok(()) => {
                // Returned by the worker that dequeues the job
                permit.forget();
                Dispatch::Queued
            }
            Err(_) => {
                self.shared.pending().remove(&feed_id);
                Dispatch::Closed
            }
        }
    }

    /// Cancel the scope, close the queue and wait for every worker to return.
    ///
    /// A worker in the middle of a job finishes it first.
    pub(crate) async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.job_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn run_worker(shared: Arc<PoolShared>, slot: usize, worker_id: u64) {
    let mut target_rx = shared.target_tx.subscribe();
    tracing::debug!(worker = worker_id, slot = slot, "Worker started");

    let retired = loop {
        if shared.retire_if_surplus(slot) {
            break true;
        }

        let job = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break false,
            changed = target_rx.changed() => {
                if changed.is_err() {
                    break false;
                }
                continue;
            }
            job = async { shared.jobs.lock().await.recv().await } => job,
        };

        let Some(feed) = job else {
            break false;
        };
        shared.queue_permits.add_permits(1);
        shared.processor.process(&feed, worker_id).await;
        shared.pending().remove(&feed.id);
    };

    if retired {
        tracing::debug!(worker = worker_id, slot = slot, "Worker retired");
    } else {
        shared.release(slot);
        tracing::debug!(worker = worker_id, slot = slot, "Worker stopped");
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedItem, FetchError, Fetcher};
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Blocks every fetch until a permit is released
    struct GatedFetcher {
        gate: Arc<Semaphore>,
        in_flight: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch_and_parse(&self, _url: &str) -> Result<Vec<FeedItem>, FetchError> {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            Ok(Vec::new())
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    struct Harness {
        pool: WorkerPool,
        feeds: Vec<Feed>,
        gate: Arc<Semaphore>,
        in_flight: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
    }

    async fn harness(workers: usize) -> Harness {
        let db = Database::open(":memory:").await.unwrap();
        let mut feeds = Vec::new();
        for i in 0..8 {
            feeds.push(
                db.create_feed(&format!("feed-{}", i), "https://example.com/rss")
                    .await
                    .unwrap(),
            );
        }
        let gate = Arc::new(Semaphore::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let fetcher = GatedFetcher {
            gate: Arc::clone(&gate),
            in_flight: Arc::clone(&in_flight),
        };
        let live = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::start(
            workers,
            FeedProcessor::new(Arc::new(db), Arc::new(fetcher)),
            CancellationToken::new(),
            Arc::clone(&live),
        );
        Harness {
            pool,
            feeds,
            gate,
            in_flight,
            live,
        }
    }

    #[tokio::test]
    async fn test_full_queue_sheds_load() {
        let Harness {
            pool,
            feeds,
            gate,
            in_flight,
            ..
        } = harness(1).await;

        assert_eq!(pool.dispatch(feeds[0].clone()), Dispatch::Queued);
        wait_for(|| in_flight.load(Ordering::SeqCst) == 1).await;

        // One worker busy, capacity 2
        assert_eq!(pool.dispatch(feeds[1].clone()), Dispatch::Queued);
        assert_eq!(pool.dispatch(feeds[2].clone()), Dispatch::Queued);
        assert_eq!(pool.dispatch(feeds[3].clone()), Dispatch::Full);

        gate.add_permits(10);
        pool.shutdown().await;
        assert_eq!(pool.dispatch(feeds[4].clone()), Dispatch::Closed);
    }

    #[tokio::test]
    async fn test_grow_widens_queue() {
        let Harness {
            pool,
            feeds,
            gate,
            in_flight,
            live,
        } = harness(1).await;

        pool.resize(5);
        assert_eq!(live.load(Ordering::SeqCst), 5);

        // Five jobs dispatched back to back all fit, even before any worker wakes
        for feed in &feeds[..5] {
            assert_eq!(pool.dispatch(feed.clone()), Dispatch::Queued);
        }
        wait_for(|| in_flight.load(Ordering::SeqCst) == 5).await;

        gate.add_permits(10);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_feed_in_progress_is_not_queued_twice() {
        let Harness {
            pool,
            feeds,
            gate,
            in_flight,
            ..
        } = harness(2).await;

        assert_eq!(pool.dispatch(feeds[0].clone()), Dispatch::Queued);
        wait_for(|| in_flight.load(Ordering::SeqCst) == 1).await;
        assert_eq!(pool.dispatch(feeds[0].clone()), Dispatch::InFlight);
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);

        // Once the job completes the feed can be queued again
        gate.add_permits(1);
        wait_for(|| pool.dispatch(feeds[0].clone()) == Dispatch::Queued).await;

        gate.add_permits(10);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shrink_converges_to_target() {
        let Harness {
            pool, gate, live, ..
        } = harness(4).await;
        wait_for(|| live.load(Ordering::SeqCst) == 4).await;

        pool.resize(1);
        wait_for(|| live.load(Ordering::SeqCst) == 1).await;

        pool.resize(3);
        assert_eq!(live.load(Ordering::SeqCst), 3);

        gate.add_permits(10);
        pool.shutdown().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_job() {
        let Harness {
            pool,
            feeds,
            gate,
            in_flight,
            live,
        } = harness(2).await;
        pool.dispatch(feeds[0].clone());
        wait_for(|| in_flight.load(Ordering::SeqCst) == 1).await;

        let release = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                gate.add_permits(1);
            })
        };

        pool.shutdown().await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        release.await.unwrap();
    }
}
