//! The background aggregator: a resizable worker pool driven by a tick
//! scheduler, with start/stop and live reconfiguration.
//!
//! # Lock discipline
//!
//! - `lifecycle` (async mutex) serializes `start`, `stop`, `set_interval` and
//!   `resize`. It is the only lock held across `.await`.
//! - `state` (read-mostly `RwLock`) mirrors the current settings and running
//!   flag. Guards are taken only for the in-memory read or write.

mod error;
pub mod lifecycle;
mod pool;
mod processor;
mod scheduler;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::feed::Fetcher;
use crate::storage::Repository;
use crate::util::format_duration;

pub use error::AggregatorError;

use pool::WorkerPool;
use processor::FeedProcessor;
use scheduler::Scheduler;

/// Shortest accepted fetch interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_WORKERS: usize = 3;

pub fn validate_interval(interval: Duration) -> Result<(), AggregatorError> {
    if interval < MIN_INTERVAL {
        return Err(AggregatorError::InvalidConfig(format!(
            "interval {} is below the minimum of {}",
            format_duration(interval),
            format_duration(MIN_INTERVAL)
        )));
    }
    Ok(())
}

pub fn validate_workers(workers: usize) -> Result<(), AggregatorError> {
    if workers == 0 {
        return Err(AggregatorError::InvalidConfig(
            "worker count must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Validated fetch interval and worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    interval: Duration,
    workers: usize,
}

impl Settings {
    pub fn new(interval: Duration, workers: usize) -> Result<Self, AggregatorError> {
        validate_interval(interval)?;
        validate_workers(workers)?;
        Ok(Self { interval, workers })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            workers: DEFAULT_WORKERS,
        }
    }
}

pub(crate) struct AggregatorState {
    pub(crate) settings: Settings,
    pub(crate) running: bool,
}

impl AggregatorState {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            settings,
            running: false,
        }
    }
}

pub(crate) fn read_state(state: &RwLock<AggregatorState>) -> RwLockReadGuard<'_, AggregatorState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_state(state: &RwLock<AggregatorState>) -> RwLockWriteGuard<'_, AggregatorState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

/// Everything owned by one Running period
struct RunHandle {
    cancel: CancellationToken,
    pool: Arc<WorkerPool>,
    scheduler: JoinHandle<()>,
    interval_tx: watch::Sender<Duration>,
}

/// Periodic feed aggregator.
///
/// One instance is shared (behind an `Arc`) by the process entry point and the
/// control server.
pub struct Aggregator {
    repo: Arc<dyn Repository>,
    fetcher: Arc<dyn Fetcher>,
    state: Arc<RwLock<AggregatorState>>,
    lifecycle: tokio::sync::Mutex<Option<RunHandle>>,
    live: Arc<AtomicUsize>,
}

impl Aggregator {
    pub fn new(repo: Arc<dyn Repository>, fetcher: Arc<dyn Fetcher>, settings: Settings) -> Self {
        Self {
            repo,
            fetcher,
            state: Arc::new(RwLock::new(AggregatorState::new(settings))),
            lifecycle: tokio::sync::Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start the worker pool and the scheduler.
    ///
    /// The first fetch cycle runs immediately; later cycles follow the
    /// configured interval.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::AlreadyRunning`] if a previous `start` has not been
    /// followed by `stop`.
    pub async fn start(&self) -> Result<(), AggregatorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(AggregatorError::AlreadyRunning);
        }

        let settings = self.settings();
        let cancel = CancellationToken::new();
        let pool = Arc::new(WorkerPool::start(
            settings.workers(),
            FeedProcessor::new(Arc::clone(&self.repo), Arc::clone(&self.fetcher)),
            cancel.clone(),
            Arc::clone(&self.live),
        ));

        let (interval_tx, interval_rx) = watch::channel(settings.interval());
        let scheduler = tokio::spawn(
            Scheduler {
                repo: Arc::clone(&self.repo),
                pool: Arc::clone(&pool),
                state: Arc::clone(&self.state),
                cancel: cancel.clone(),
                interval_rx,
            }
            .run(),
        );

        *lifecycle = Some(RunHandle {
            cancel,
            pool,
            scheduler,
            interval_tx,
        });
        write_state(&self.state).running = true;

        tracing::info!(
            interval = %format_duration(settings.interval()),
            workers = settings.workers(),
            "Aggregator started"
        );
        Ok(())
    }

    /// Stop the scheduler and wait for every worker to exit.
    ///
    /// Jobs still queued are dropped; jobs already being processed finish.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::NotRunning`] if the aggregator is stopped.
    pub async fn stop(&self) -> Result<(), AggregatorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handle) = lifecycle.take() else {
            return Err(AggregatorError::NotRunning);
        };

        handle.cancel.cancel();
        if let Err(e) = handle.scheduler.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }
        handle.pool.shutdown().await;

        write_state(&self.state).running = false;
        tracing::info!("Aggregator stopped");
        Ok(())
    }

    /// Change the fetch interval. When running, the timer restarts so the next
    /// tick is `interval` from now.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::InvalidConfig`] below [`MIN_INTERVAL`]; the previous
    /// interval stays in effect.
    pub async fn set_interval(&self, interval: Duration) -> Result<(), AggregatorError> {
        validate_interval(interval)?;

        let lifecycle = self.lifecycle.lock().await;
        let previous = {
            let mut state = write_state(&self.state);
            std::mem::replace(&mut state.settings.interval, interval)
        };
        if let Some(handle) = lifecycle.as_ref() {
            handle.interval_tx.send_replace(interval);
        }

        tracing::info!(
            from = %format_duration(previous),
            to = %format_duration(interval),
            "Interval changed"
        );
        Ok(())
    }

    /// Change the worker count. Growing takes effect immediately; surplus
    /// workers retire after their current job.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::InvalidConfig`] for zero.
    pub async fn resize(&self, workers: usize) -> Result<(), AggregatorError> {
        validate_workers(workers)?;

        let lifecycle = self.lifecycle.lock().await;
        let previous = {
            let mut state = write_state(&self.state);
            std::mem::replace(&mut state.settings.workers, workers)
        };
        if let Some(handle) = lifecycle.as_ref() {
            handle.pool.resize(workers);
        }

        tracing::info!(from = previous, to = workers, "Worker count changed");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        read_state(&self.state).running
    }

    pub fn settings(&self) -> Settings {
        read_state(&self.state).settings
    }

    /// Number of worker tasks currently alive
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}
