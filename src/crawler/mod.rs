//! Crawler module for target fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Response classification into fetch outcomes
//! - HTTP fetching with identity rotation and request signing
//! - JSON and HTML extraction of records and discovered targets
//! - The bounded worker pool with its retry policy
//! - Overall crawl coordination

mod coordinator;
mod extractor;
mod fetcher;
mod outcome;
mod pool;

pub use coordinator::Coordinator;
pub use extractor::{
    build_extractor, Extraction, ExtractionError, Extractor, HtmlExtractor, JsonExtractor,
};
pub use fetcher::{build_http_client, Fetcher, HttpFetcher};
pub use outcome::{Classifier, DropReason, FetchOutcome, Payload};
pub use pool::{PoolSettings, RetryPolicy, WorkerPool};

use crate::config::Config;
use crate::output::CrawlReport;
use crate::Result;
use tokio_util::sync::CancellationToken;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Connect the frontier and load signing keys
/// 2. Seed the frontier from the configured sources
/// 3. Drain it through the worker pool
/// 4. Append extracted records to the records file
/// 5. Return the run's report
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `cancel` - Stops the run early; queued records are still written
pub async fn crawl(config: Config, cancel: CancellationToken) -> Result<CrawlReport> {
    Coordinator::new(config).await?.run(cancel).await
}
