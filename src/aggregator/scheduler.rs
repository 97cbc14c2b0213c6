use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::pool::{Dispatch, WorkerPool};
use super::{read_state, AggregatorState};
use crate::storage::Repository;
use crate::util::format_duration;

/// Tick loop that selects the stalest feeds and hands them to the pool.
pub(crate) struct Scheduler {
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) state: Arc<RwLock<AggregatorState>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) interval_rx: watch::Receiver<Duration>,
}

/// Timer whose first tick is one full period away
fn ticker(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl Scheduler {
    /// Run one cycle immediately, then one per tick until cancelled.
    ///
    /// An interval change replaces the timer, so the next tick is one new
    /// period after the change.
    pub(crate) async fn run(mut self) {
        let period = *self.interval_rx.borrow_and_update();
        self.run_cycle().await;
        let mut timer = ticker(period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *self.interval_rx.borrow_and_update();
                    timer = ticker(period);
                    tracing::info!(interval = %format_duration(period), "Fetch interval updated");
                }
                _ = timer.tick() => self.run_cycle().await,
            }
        }

        tracing::debug!("Scheduler stopped");
    }

    async fn run_cycle(&self) {
        let workers = read_state(&self.state).settings.workers();

        let feeds = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            feeds = self.repo.oldest_feeds(workers) => feeds,
        };
        let feeds = match feeds {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to select feeds for fetch cycle");
                return;
            }
        };

        let selected = feeds.len();
        let mut queued = 0;
        let mut skipped = 0;
        let mut in_flight = 0;
        for feed in feeds {
            let name = feed.name.clone();
            match self.pool.dispatch(feed) {
                Dispatch::Queued => queued += 1,
                Dispatch::Full => {
                    tracing::debug!(feed = %name, "Job queue full, skipping feed this cycle");
                    skipped += 1;
                }
                Dispatch::InFlight => {
                    tracing::debug!(feed = %name, "Feed still in progress, not queued again");
                    in_flight += 1;
                }
                Dispatch::Closed => break,
            }
        }

        tracing::info!(
            workers = workers,
            selected = selected,
            queued = queued,
            skipped = skipped,
            in_flight = in_flight,
            "Fetch cycle dispatched"
        );
    }
}
