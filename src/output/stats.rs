//! Run statistics
//!
//! Workers update a shared [`CrawlStats`] with relaxed atomic counters; at
//! the end of a run the counters are frozen into a [`CrawlReport`].

use crate::crawler::DropReason;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every worker
#[derive(Debug, Default)]
pub struct CrawlStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    discovered: AtomicU64,
    emitted: AtomicU64,
    drops: [AtomicU64; DropReason::ALL.len()],
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A discovered target was admitted as new
    pub fn record_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was handed to the sink
    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        self.drops[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drops[reason.index()].load(Ordering::Relaxed)
    }

    /// Freezes the counters into a report
    ///
    /// # Arguments
    ///
    /// * `seeded` - Targets the seeder admitted
    /// * `records_written` - Lines the sink writer persisted
    /// * `started_at` - When the run began
    pub fn report(&self, seeded: u64, records_written: u64, started_at: DateTime<Utc>) -> CrawlReport {
        let drops = DropReason::ALL
            .iter()
            .map(|&reason| (reason, self.dropped(reason)))
            .collect();

        CrawlReport {
            started_at,
            finished_at: Utc::now(),
            seeded,
            attempts: self.attempts(),
            successes: self.successes(),
            retries: self.retries.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            records_emitted: self.emitted.load(Ordering::Relaxed),
            records_written,
            drops,
            cancelled: false,
        }
    }
}

/// Final account of a run
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Targets admitted by the seeder
    pub seeded: u64,

    /// Fetch attempts, retries included
    pub attempts: u64,

    /// Targets fetched and extracted successfully
    pub successes: u64,

    pub retries: u64,

    /// New targets admitted from discovery
    pub discovered: u64,

    pub records_emitted: u64,
    pub records_written: u64,

    /// Targets given up on, per reason
    pub drops: BTreeMap<DropReason, u64>,

    /// True if the run stopped on cancellation
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drops.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_dropped(&self) -> u64 {
        self.drops.values().sum()
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// Prints a report to stdout in a formatted manner
pub fn print_report(report: &CrawlReport) {
    println!("=== Crawl Report ===\n");

    println!("Overview:");
    println!("  Started:  {}", report.started_at.to_rfc3339());
    println!("  Finished: {}", report.finished_at.to_rfc3339());
    println!("  Duration: {}s", report.duration_seconds());
    if report.cancelled {
        println!("  Stopped early by cancellation");
    }
    println!();

    println!("Targets:");
    println!("  Seeded:     {}", report.seeded);
    println!("  Discovered: {}", report.discovered);
    println!("  Fetched:    {}", report.successes);
    println!("  Attempts:   {} ({} retries)", report.attempts, report.retries);
    println!();

    println!("Records:");
    println!("  Emitted: {}", report.records_emitted);
    println!("  Written: {}", report.records_written);
    println!();

    let total = report.total_dropped();
    println!("Dropped ({}):", total);
    for (reason, count) in report.drops.iter().filter(|(_, count)| **count > 0) {
        let percentage = (*count as f64 / total as f64) * 100.0;
        println!("  {}: {} ({:.1}%)", reason, count, percentage);
    }
}
