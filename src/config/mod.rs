//! Configuration module for Sumi-Trawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_trawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("trawl.toml")).unwrap();
//! println!("Fetching with {} workers", config.crawler.worker_count());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ClassifyConfig, Config, CrawlerConfig, ExtractConfig, ExtractKind, FrontierConfig,
    FrontierMode, IdRange, IdentityConfig, OutputConfig, PageSeed, SeedConfig, SigningConfig,
    TargetConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_from_str, load_config_with_hash};
