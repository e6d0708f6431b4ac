//! Enrichment worker pool
//!
//! A dispatcher (the calling thread) repeatedly reads batches of unenriched
//! stubs and hands their ids over an unbuffered channel to a fixed set of
//! worker threads. Each worker fetches one message's metadata at a time and
//! applies the outcome to the store:
//!
//! - success: record updated and marked processed
//! - not found: record removed
//! - rate limited: worker sleeps, record left for a later pass
//! - any other fetch failure: the worker stops; the rest of the pool
//!   carries on and the record is left for the next run
//!
//! A failed store write is fatal: the dispatcher stops handing out work and
//! the run returns the error once the current pass has settled.
//!
//! Each pass waits for its in-flight messages to settle before the next query,
//! so an id is never held by two workers at once. When a pass finds nothing
//! left to hand out the dispatcher closes the channel and joins every worker
//! before returning.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};

use crate::models::MessageId;
use crate::source::{FetchError, MailSource};
use crate::storage::MailStore;

/// Smallest accepted worker count
pub const MIN_CONCURRENCY: usize = 1;
/// Largest accepted worker count
pub const MAX_CONCURRENCY: usize = 50;
/// Unenriched records read per dispatch pass
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Pause taken by a worker after being rate limited
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

/// Errors specific to configuring the pool
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("concurrency must be between {min} and {max}, got {0}", min = MIN_CONCURRENCY, max = MAX_CONCURRENCY)]
    InvalidConcurrency(usize),
}

/// Failure that keeps a worker from settling one message
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Unclassified fetch failure; stops only the worker that hit it
    #[error("{0:#}")]
    Fetch(anyhow::Error),
    /// Store write failure; aborts the run
    #[error("{0:#}")]
    Store(anyhow::Error),
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    concurrency: usize,
    batch_size: usize,
    rate_limit_backoff: Duration,
}

impl EnrichOptions {
    /// Options for `concurrency` workers, which must be within 1..=50
    pub fn new(concurrency: usize) -> Result<Self, EnrichError> {
        let options = Self {
            concurrency,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit_backoff: RATE_LIMIT_BACKOFF,
        };
        options.validate()?;
        Ok(options)
    }

    /// Override the number of records read per dispatch pass
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Override the rate-limit backoff
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn validate(&self) -> Result<(), EnrichError> {
        if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            Ok(())
        } else {
            Err(EnrichError::InvalidConcurrency(self.concurrency))
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Metadata stored, record marked processed
    Enriched,
    /// Message gone upstream, record removed
    Removed,
    /// Source throttled us, record untouched
    RateLimited,
}

/// Statistics from a pool run
#[derive(Debug, Default, Clone)]
pub struct EnrichStats {
    /// Ids handed to workers (including re-deliveries)
    pub dispatched: usize,
    pub enriched: usize,
    pub removed: usize,
    pub rate_limited: usize,
    /// Workers that stopped on an unexpected failure
    pub workers_stopped: usize,
    /// Records left unenriched because their fetch stopped a worker
    pub failed: usize,
    /// Records still unenriched when the run ended
    pub remaining: usize,
    /// Dispatch passes that found work
    pub passes: usize,
    pub duration_ms: u64,
}

/// Fetch one message's metadata and apply the outcome to the store.
///
/// Returns an error for failures that should stop the calling worker,
/// split by whether the fetch or the store write failed.
pub fn enrich_one(
    source: &dyn MailSource,
    store: &dyn MailStore,
    id: &MessageId,
) -> Result<Outcome, WorkerError> {
    match source.get_message_metadata(id) {
        Ok(metadata) => {
            store
                .update_message(id, &metadata)
                .with_context(|| format!("Can't update message {}", id))
                .map_err(WorkerError::Store)?;
            Ok(Outcome::Enriched)
        }
        Err(FetchError::NotFound) => {
            store
                .remove_message(id)
                .with_context(|| format!("Can't remove message {}", id))
                .map_err(WorkerError::Store)?;
            Ok(Outcome::Removed)
        }
        Err(FetchError::RateLimited) => Ok(Outcome::RateLimited),
        Err(FetchError::Other(e)) => Err(WorkerError::Fetch(
            e.context(format!("Unable to retrieve message {}", id)),
        )),
    }
}

/// State shared between the dispatcher and the workers
#[derive(Default)]
struct PoolState {
    dispatched: AtomicUsize,
    enriched: AtomicUsize,
    removed: AtomicUsize,
    rate_limited: AtomicUsize,
    workers_stopped: AtomicUsize,
    /// Ids whose fetch stopped a worker; never handed out again this run
    failed: Mutex<HashSet<MessageId>>,
    /// First store failure seen by any worker
    store_failure: Mutex<Option<anyhow::Error>>,
    in_flight: Mutex<usize>,
    settled: Condvar,
}

impl PoolState {
    fn begin(&self) {
        *self.in_flight.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn finish(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.settled.notify_all();
        }
    }

    /// Block until every handed-out id has been dealt with
    fn wait_settled(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        while *in_flight > 0 {
            in_flight = self
                .settled
                .wait(in_flight)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn mark_failed(&self, id: MessageId) {
        if let Ok(mut failed) = self.failed.lock() {
            failed.insert(id);
        }
    }

    fn record_store_failure(&self, e: anyhow::Error) {
        let mut failure = self.store_failure.lock().unwrap_or_else(|e| e.into_inner());
        if failure.is_none() {
            *failure = Some(e);
        }
    }

    fn has_store_failure(&self) -> bool {
        self.store_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn take_store_failure(&self) -> Option<anyhow::Error> {
        self.store_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn failed_ids(&self) -> Result<HashSet<MessageId>> {
        Ok(self
            .failed
            .lock()
            .map_err(|_| anyhow!("pool state lock poisoned"))?
            .clone())
    }
}

/// Enrich every unprocessed record in the store.
///
/// Rejects an out-of-range concurrency before touching the store. Returns
/// once a dispatch pass finds nothing left to hand out, or every worker has
/// stopped, and all workers have exited. Workers stopped by fetch failures
/// do not fail the run; a store write failure does.
pub fn enrich_all(
    source: &dyn MailSource,
    store: &dyn MailStore,
    options: &EnrichOptions,
) -> Result<EnrichStats> {
    options.validate()?;
    let start = Instant::now();
    let state = PoolState::default();

    let (tx, rx) = flume::bounded::<MessageId>(0);

    let passes = thread::scope(|scope| {
        for worker in 0..options.concurrency {
            let rx = rx.clone();
            let state = &state;
            let backoff = options.rate_limit_backoff;
            scope.spawn(move || run_worker(worker, source, store, rx, backoff, state));
        }
        drop(rx);

        let result = dispatch(store, &tx, options, &state);
        // Closing the channel lets idle workers fall out of their loop
        drop(tx);
        result
    })?;

    let stats = EnrichStats {
        dispatched: state.dispatched.load(Ordering::Relaxed),
        enriched: state.enriched.load(Ordering::Relaxed),
        removed: state.removed.load(Ordering::Relaxed),
        rate_limited: state.rate_limited.load(Ordering::Relaxed),
        workers_stopped: state.workers_stopped.load(Ordering::Relaxed),
        failed: state.failed_ids()?.len(),
        remaining: store.count_unprocessed()?,
        passes,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        "Enrichment finished: {} enriched, {} removed, {} rate limited, {} workers stopped",
        stats.enriched, stats.removed, stats.rate_limited, stats.workers_stopped
    );
    if stats.remaining > 0 {
        warn!(
            "{} messages left unenriched for the next run ({} stopped a worker)",
            stats.remaining, stats.failed
        );
    }

    Ok(stats)
}

/// Feed unprocessed ids to the workers until a pass finds none or no
/// worker is left.
///
/// Returns the number of passes that found work, or the first store
/// failure reported by a worker.
fn dispatch(
    store: &dyn MailStore,
    tx: &flume::Sender<MessageId>,
    options: &EnrichOptions,
    state: &PoolState,
) -> Result<usize> {
    let mut passes = 0;

    loop {
        if let Some(e) = state.take_store_failure() {
            return Err(e.context("Enrichment aborted"));
        }

        let failed = state.failed_ids()?;
        let ids: Vec<MessageId> = store
            .find_unprocessed(options.batch_size + failed.len())
            .context("Can't query unenriched messages")?
            .into_iter()
            .filter(|id| !failed.contains(id))
            .collect();

        if ids.is_empty() {
            return Ok(passes);
        }

        passes += 1;
        info!(
            "Pass {}: dispatching {} messages ({} enriched so far)",
            passes,
            ids.len(),
            state.enriched.load(Ordering::Relaxed)
        );

        for id in ids {
            if state.has_store_failure() {
                break;
            }

            state.begin();
            // Blocks until a worker is free; fails only once every worker is gone
            if tx.send(id).is_err() {
                state.finish();
                if let Some(e) = state.take_store_failure() {
                    return Err(e.context("Enrichment aborted"));
                }
                warn!("All {} workers stopped", options.concurrency);
                return Ok(passes);
            }
            state.dispatched.fetch_add(1, Ordering::Relaxed);
        }

        state.wait_settled();
    }
}

/// Consume ids until the channel closes or an unexpected failure occurs
fn run_worker(
    worker: usize,
    source: &dyn MailSource,
    store: &dyn MailStore,
    rx: flume::Receiver<MessageId>,
    backoff: Duration,
    state: &PoolState,
) {
    debug!("Worker {} started", worker);

    for id in rx.iter() {
        match enrich_one(source, store, &id) {
            Ok(Outcome::Enriched) => {
                state.enriched.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Outcome::Removed) => {
                state.removed.fetch_add(1, Ordering::Relaxed);
                debug!("Message {} no longer exists, removed", id);
            }
            Ok(Outcome::RateLimited) => {
                state.rate_limited.fetch_add(1, Ordering::Relaxed);
                warn!("Worker {} rate limited on {}, sleeping {:?}", worker, id, backoff);
                thread::sleep(backoff);
            }
            Err(WorkerError::Fetch(e)) => {
                error!("Worker {} stopping: {:#}", worker, e);
                state.mark_failed(id);
                state.workers_stopped.fetch_add(1, Ordering::Relaxed);
                state.finish();
                return;
            }
            Err(WorkerError::Store(e)) => {
                error!("Worker {} stopping, store write failed: {:#}", worker, e);
                state.record_store_failure(e);
                state.workers_stopped.fetch_add(1, Ordering::Relaxed);
                state.finish();
                return;
            }
        }
        state.finish();
    }

    debug!("Worker {} finished", worker);
}
