//! Fetch worker pool
//!
//! A fixed number of workers drain the frontier. All of them share one
//! counting gate, so no more than `concurrency` fetches are ever in flight
//! regardless of the worker count. A permit is held only around the fetch
//! itself; extraction, admission of discovered targets and sink writes happen
//! after it is released.
//!
//! # Worker loop
//!
//! 1. Pop a target (exit on `None` or cancellation; back off on store errors)
//! 2. Acquire a gate permit, then wait for the request-rate quota if one is set
//! 3. Pick an identity, attach signing keys if required, fetch with a timeout
//! 4. Release the permit
//! 5. Success → extract, admit discovered targets, emit the record
//! 6. Retryable failure → back off and retry while the budget lasts
//! 7. Report the target as done

use crate::crawler::extractor::Extractor;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::outcome::{DropReason, FetchOutcome, Payload};
use crate::frontier::{Frontier, Target};
use crate::identity::{KeyRing, KeySnapshot, Rotator};
use crate::output::CrawlStats;
use crate::sink::SinkHandle;
use crate::TrawlError;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Single retry budget shared by every retryable outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Back-off before retry number `retry` (0-based): `backoff * 2^retry`, capped
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Sizing and timing of the pool
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Maximum fetches in flight
    pub concurrency: usize,
    /// Logical worker tasks
    pub workers: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Fetch attempts started per second across all workers
    pub rate_limit: Option<NonZeroU32>,
}

/// Collaborators shared by every worker
pub struct WorkerPool {
    frontier: Arc<dyn Frontier>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    rotator: Arc<Rotator>,
    keys: Option<Arc<KeyRing>>,
    sink: SinkHandle,
    stats: Arc<CrawlStats>,
    gate: Arc<Semaphore>,
    limiter: Option<DefaultRateLimiter>,
    settings: PoolSettings,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frontier: Arc<dyn Frontier>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        rotator: Arc<Rotator>,
        keys: Option<Arc<KeyRing>>,
        sink: SinkHandle,
        stats: Arc<CrawlStats>,
        settings: PoolSettings,
    ) -> Self {
        let gate = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let limiter = settings
            .rate_limit
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            frontier,
            fetcher,
            extractor,
            rotator,
            keys,
            sink,
            stats,
            gate,
            limiter,
            settings,
        }
    }

    /// Runs every worker to completion
    ///
    /// Returns once the frontier reports done or `cancel` fires. Frontier
    /// store errors are retried with back-off; if a worker hits a sink
    /// failure, the remaining workers are stopped and the first error is
    /// returned.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), TrawlError> {
        let workers = self.settings.workers.max(1);
        let pool = Arc::new(self);
        let stop = cancel.child_token();

        tracing::info!(
            "Starting {} workers (at most {} concurrent fetches)",
            workers,
            pool.settings.concurrency
        );

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let pool = pool.clone();
            let stop = stop.clone();
            tasks.spawn(async move { pool.worker_loop(id, stop).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| TrawlError::FatalConfiguration(format!("worker panicked: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                tracing::error!("Worker failed: {}", e);
                stop.cancel();
                // Workers blocked in a local pop only wake on close
                pool.frontier.close();
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn worker_loop(&self, id: usize, cancel: CancellationToken) -> Result<(), TrawlError> {
        let mut pop_failures = 0u32;

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.frontier.pop() => popped,
            };

            let target = match popped {
                Ok(Some(target)) => {
                    pop_failures = 0;
                    target
                }
                Ok(None) => break,
                Err(e) => {
                    let delay = self.settings.retry.delay(pop_failures);
                    pop_failures = pop_failures.saturating_add(1);
                    tracing::warn!(
                        "Worker {} cannot pop from the frontier ({}), retrying in {:?}",
                        id,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            tracing::debug!("Worker {} processing {}", id, target);
            let result = self.process(&target, &cancel).await;
            self.frontier.task_done().await;
            result?;
        }

        tracing::debug!("Worker {} finished", id);
        Ok(())
    }

    /// Fetches `target` until it succeeds, is dropped, or the run is cancelled
    async fn process(&self, target: &Target, cancel: &CancellationToken) -> Result<(), TrawlError> {
        let mut retries = 0u32;

        loop {
            let keys = self.signing_keys().await;
            let outcome = match self.attempt(target, keys.as_ref(), cancel).await {
                Some(outcome) => outcome,
                None => return Ok(()),
            };

            let outcome = match outcome {
                FetchOutcome::Success(payload) => {
                    if let Some(ring) = &self.keys {
                        ring.report_success();
                    }
                    return self.handle_success(target, payload).await;
                }
                other => other,
            };

            if !outcome.is_retryable() {
                tracing::debug!("Dropping {} ({:?})", target, outcome);
                self.stats
                    .record_drop(outcome.drop_reason().unwrap_or(DropReason::Transient));
                return Ok(());
            }

            if let FetchOutcome::FatalAuthError(reason) = &outcome {
                tracing::warn!("Signature rejected for {}: {}", target, reason);
                if let (Some(ring), Some(snapshot)) = (&self.keys, &keys) {
                    ring.report_auth_failure(snapshot.generation).await;
                }
            }

            if retries >= self.settings.retry.max_retries {
                let reason = outcome.drop_reason().unwrap_or(DropReason::Transient);
                tracing::warn!(
                    "Dropping {} after {} attempts ({:?})",
                    target,
                    retries + 1,
                    outcome
                );
                self.stats.record_drop(reason);
                return Ok(());
            }

            let delay = self.settings.retry.delay(retries);
            retries += 1;
            self.stats.record_retry();
            tracing::debug!("Retrying {} in {:?} ({:?})", target, delay, outcome);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One gated fetch attempt; `None` means the run was cancelled
    async fn attempt(
        &self,
        target: &Target,
        keys: Option<&KeySnapshot>,
        cancel: &CancellationToken,
    ) -> Option<FetchOutcome> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return None,
            permit = self.gate.clone().acquire_owned() => permit.ok()?,
        };

        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = limiter.until_ready() => {}
            }
        }

        let identity = self.rotator.next();
        let pair = keys.map(|snapshot| snapshot.pair.as_ref());
        self.stats.record_attempt();

        let fetch = tokio::time::timeout(
            self.settings.request_timeout,
            self.fetcher.fetch(target, &identity, pair),
        );

        tokio::select! {
            _ = cancel.cancelled() => None,
            result = fetch => Some(result.unwrap_or_else(|_| {
                FetchOutcome::TransientError("request timeout".to_string())
            })),
        }
    }

    async fn signing_keys(&self) -> Option<KeySnapshot> {
        if !self.fetcher.requires_signing() {
            return None;
        }
        match &self.keys {
            Some(ring) => ring.current().await,
            None => None,
        }
    }

    async fn handle_success(&self, target: &Target, payload: Payload) -> Result<(), TrawlError> {
        let extraction = match self.extractor.extract(target, &payload) {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!("Extraction failed for {}: {}", target, e);
                self.stats.record_drop(DropReason::Extraction);
                return Ok(());
            }
        };

        for discovered in extraction.discovered {
            match self.frontier.try_seed(discovered.clone()).await {
                Ok(true) => self.stats.record_discovered(),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Cannot admit {} found on {}: {}", discovered, target, e);
                    self.stats.record_drop(DropReason::Admission);
                }
            }
        }

        if let Some(record) = extraction.record {
            self.sink.emit(record).await?;
            self.stats.record_emitted();
        }

        self.stats.record_success();
        Ok(())
    }
}
