//! Crawl coordinator - wires a run together
//!
//! The coordinator turns a validated [`Config`] into the collaborators of a
//! run and drives it:
//! - Building the frontier (local or shared) and seeding it
//! - Building the fetcher, extractor, identity rotator and key ring
//! - Running the worker pool against the sink writer
//! - Keeping the signing keys fresh and watching an idle shared queue
//! - Producing the final [`CrawlReport`]
//!
//! Everything that can make a run impossible (unreachable shared store, no
//! usable client, no signing keys) fails in [`Coordinator::new`], before any
//! worker starts.

use crate::config::{Config, FrontierMode, SigningConfig};
use crate::crawler::extractor::{build_extractor, Extractor};
use crate::crawler::fetcher::{build_http_client, Fetcher, HttpFetcher};
use crate::crawler::outcome::Classifier;
use crate::crawler::pool::{PoolSettings, RetryPolicy, WorkerPool};
use crate::frontier::{Frontier, LocalFrontier, RedisStore, SharedFrontier};
use crate::identity::{KeyRing, KeySource, NavKeySource, Rotator, StaticKeySource};
use crate::output::{CrawlReport, CrawlStats};
use crate::seed::{seed_frontier, SeedPlan, SeedSummary};
use crate::signing::SigningKeyPair;
use crate::sink::SinkWriter;
use crate::{Result, TrawlError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    frontier: Arc<dyn Frontier>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    rotator: Arc<Rotator>,
    keys: Option<Arc<KeyRing>>,
    plan: SeedPlan,
}

impl Coordinator {
    /// Creates a coordinator, connecting to the configured frontier
    ///
    /// # Arguments
    ///
    /// * `config` - A validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Every collaborator is ready
    /// * `Err(TrawlError::FatalConfiguration)` - The run cannot start
    pub async fn new(config: Config) -> Result<Self> {
        let frontier = build_frontier(&config).await?;
        Self::with_frontier(config, frontier).await
    }

    /// Creates a coordinator around an existing frontier
    pub async fn with_frontier(config: Config, frontier: Arc<dyn Frontier>) -> Result<Self> {
        let timeout = Duration::from_secs(config.crawler.request_timeout_secs);

        let rotator = Rotator::new(&config.identity);
        let classifier = Classifier::from_config(&config.classify);
        let fetcher = HttpFetcher::new(
            &config.target,
            classifier,
            rotator.proxy_endpoints(),
            timeout,
        )?;

        let keys = match (&config.signing, config.target.sign) {
            (Some(signing), true) => Some(Arc::new(build_key_ring(signing, timeout).await?)),
            (Some(_), false) => {
                tracing::debug!("[signing] configured but target.sign is off, keys not loaded");
                None
            }
            (None, true) => {
                return Err(TrawlError::FatalConfiguration(
                    "target.sign requires a [signing] section".to_string(),
                ))
            }
            (None, false) => None,
        };

        let extractor: Arc<dyn Extractor> = Arc::from(build_extractor(&config.extract));
        let plan = SeedPlan::from_config(&config.seed);

        Ok(Self {
            config: Arc::new(config),
            frontier,
            fetcher: Arc::new(fetcher),
            extractor,
            rotator: Arc::new(rotator),
            keys,
            plan,
        })
    }

    /// The frontier this run drains
    pub fn frontier(&self) -> Arc<dyn Frontier> {
        self.frontier.clone()
    }

    /// Pushes the seed plan into the frontier without crawling
    ///
    /// Only meaningful for a shared frontier, where other processes drain
    /// what this one pushes.
    pub async fn seed_only(&self, cancel: CancellationToken) -> Result<SeedSummary> {
        if self.config.frontier.mode != FrontierMode::Shared {
            return Err(TrawlError::FatalConfiguration(
                "--seed-only requires frontier.mode = \"shared\"".to_string(),
            ));
        }

        tracing::info!("Seeding {} targets into the shared frontier", self.plan.len());
        Ok(seed_frontier(&self.plan, self.frontier.as_ref(), &cancel).await?)
    }

    /// Runs the crawl until the frontier is done or `cancel` fires
    ///
    /// Records already handed to the sink are always written, even when the
    /// run is cancelled or a worker fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<CrawlReport> {
        let started_at = Utc::now();
        let settings = self.pool_settings();
        let mode = self.config.frontier.mode;

        tracing::info!(
            "Starting crawl: {} seed targets, {:?} frontier, {} workers, concurrency {}",
            self.plan.len(),
            mode,
            settings.workers,
            settings.concurrency
        );

        let sink = SinkWriter::open(
            &self.config.output.records_path,
            self.config.crawler.sink_buffer,
        )
        .await?;
        let stats = Arc::new(CrawlStats::new());

        // Stops the seeder and the pool; cancelled on worker failure as well
        let stop = cancel.child_token();
        // Stops the background helpers once the pool is done
        let helpers = CancellationToken::new();

        let seeder = self.spawn_seeder(mode == FrontierMode::Local, stop.clone());
        let mut background: Vec<JoinHandle<()>> = Vec::new();

        if let Some(ring) = &self.keys {
            let interval = self
                .config
                .signing
                .as_ref()
                .map_or(0, |s| s.refresh_interval_secs);
            if interval > 0 {
                background.push(tokio::spawn(
                    ring.clone()
                        .run_refresh_loop(Duration::from_secs(interval), helpers.clone()),
                ));
            }
        }

        if mode == FrontierMode::Shared {
            background.push(tokio::spawn(watch_idle_queue(
                self.frontier.clone(),
                Duration::from_secs(self.config.frontier.idle_poll_secs.max(1)),
                helpers.clone(),
            )));
        }

        let pool = WorkerPool::new(
            self.frontier.clone(),
            self.fetcher.clone(),
            self.extractor.clone(),
            self.rotator.clone(),
            self.keys.clone(),
            sink.handle(),
            stats.clone(),
            settings,
        );
        let pool_result = pool.run(stop.clone()).await;
        if pool_result.is_err() {
            stop.cancel();
        }

        helpers.cancel();
        for task in background {
            if let Err(e) = task.await {
                tracing::warn!("Background task failed: {}", e);
            }
        }

        let seed_result = match seeder.await {
            Ok(result) => result.map_err(TrawlError::from),
            Err(e) => Err(TrawlError::FatalConfiguration(format!(
                "seeder panicked: {}",
                e
            ))),
        };

        // Drain the sink before surfacing any error so partial progress is kept
        let written = sink.finish().await;

        pool_result?;
        let seeded = seed_result?;
        let written = written?;

        let mut report = stats.report(seeded.admitted, written, started_at);
        report.cancelled = cancel.is_cancelled() || seeded.cancelled;

        tracing::info!(
            "Crawl {}: {} records written, {} targets dropped in {}s",
            if report.cancelled { "cancelled" } else { "completed" },
            report.records_written,
            report.total_dropped(),
            report.duration_seconds()
        );

        Ok(report)
    }

    fn pool_settings(&self) -> PoolSettings {
        let crawler = &self.config.crawler;
        PoolSettings {
            concurrency: crawler.concurrency as usize,
            workers: crawler.worker_count() as usize,
            request_timeout: Duration::from_secs(crawler.request_timeout_secs),
            retry: RetryPolicy {
                max_retries: crawler.max_retries,
                backoff: Duration::from_millis(crawler.backoff_ms),
                max_backoff: Duration::from_millis(crawler.max_backoff_ms),
            },
            rate_limit: crawler.rate_limit(),
        }
    }

    /// Seeds the frontier in the background, sealing it afterwards if `seal`
    fn spawn_seeder(
        &self,
        seal: bool,
        cancel: CancellationToken,
    ) -> JoinHandle<std::result::Result<SeedSummary, crate::frontier::FrontierError>> {
        let frontier = self.frontier.clone();
        let plan = self.plan.clone();

        tokio::spawn(async move {
            let result = seed_frontier(&plan, frontier.as_ref(), &cancel).await;
            if seal {
                // Seal even on failure, otherwise workers would wait forever
                frontier.seal().await;
            }
            result
        })
    }
}

/// Connects the frontier named by `[frontier]`
async fn build_frontier(config: &Config) -> Result<Arc<dyn Frontier>> {
    let policy = config.crawler.queue_policy;

    match config.frontier.mode {
        FrontierMode::Local => Ok(Arc::new(LocalFrontier::new(policy))),
        FrontierMode::Shared => {
            let settings = &config.frontier;
            tracing::info!("Connecting to shared frontier at {}", settings.redis_url);
            let store = RedisStore::connect(&settings.redis_url)
                .await
                .map_err(|e| {
                    TrawlError::FatalConfiguration(format!(
                        "cannot reach shared frontier {}: {}",
                        settings.redis_url, e
                    ))
                })?;
            let frontier = SharedFrontier::new(
                store,
                settings.queue_key.clone(),
                settings.seen_key.clone(),
                policy,
            )
            .with_poll_timeout(Duration::from_secs(1));
            Ok(Arc::new(frontier))
        }
    }
}

/// Builds the key ring and loads its first key pair
async fn build_key_ring(signing: &SigningConfig, timeout: Duration) -> Result<KeyRing> {
    let source: Box<dyn KeySource> = match (&signing.img_key, &signing.sub_key, &signing.nav_url) {
        (Some(img_key), Some(sub_key), _) => Box::new(StaticKeySource::new(SigningKeyPair::new(
            img_key.clone(),
            sub_key.clone(),
        ))),
        (_, _, Some(nav_url)) => {
            let client = build_http_client(None, timeout)?;
            Box::new(NavKeySource::new(client, nav_url.clone()))
        }
        _ => {
            return Err(TrawlError::FatalConfiguration(
                "[signing] needs img-key and sub-key, or nav-url".to_string(),
            ))
        }
    };

    let ring = KeyRing::new(source, signing.auth_failure_threshold);
    ring.initialize().await.map_err(|e| {
        TrawlError::FatalConfiguration(format!("cannot load signing keys: {}", e))
    })?;
    Ok(ring)
}

/// Warns while a shared queue stays empty
///
/// A shared frontier never closes on its own, so an empty queue is the only
/// hint that producers have stopped.
async fn watch_idle_queue(frontier: Arc<dyn Frontier>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    let mut idle_polls = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match frontier.queued().await {
                Ok(0) => {
                    idle_polls += 1;
                    tracing::warn!(
                        "Shared queue empty for {:?}; waiting for producers",
                        every * idle_polls
                    );
                }
                Ok(queued) => {
                    idle_polls = 0;
                    tracing::debug!("Shared queue holds {} targets", queued);
                }
                Err(e) => tracing::warn!("Cannot read shared queue length: {}", e),
            },
        }
    }
}
