//! Run reporting
//!
//! Records themselves go through the sink; this module only accounts for
//! what happened during a run.

pub mod stats;

pub use stats::{print_report, CrawlReport, CrawlStats};
