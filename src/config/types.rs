use crate::frontier::QueuePolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;

/// Main configuration structure for Sumi-Trawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub signing: Option<SigningConfig>,
    #[serde(default)]
    pub frontier: FrontierConfig,
    pub output: OutputConfig,
}

/// Worker pool behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of fetches in flight at once
    pub concurrency: u32,

    /// Number of logical workers (defaults to `concurrency`)
    pub workers: Option<u32>,

    /// Timeout for a single fetch attempt (seconds)
    pub request_timeout_secs: u64,

    /// Retries allowed after the first attempt of a target
    pub max_retries: u32,

    /// Base back-off before a retry (milliseconds)
    pub backoff_ms: u64,

    /// Upper bound on a single back-off (milliseconds)
    pub max_backoff_ms: u64,

    /// Order in which queued targets are handed out
    pub queue_policy: QueuePolicy,

    /// Records buffered between workers and the sink writer
    pub sink_buffer: usize,

    /// Fetch attempts started per second across all workers (unset or 0 = no limit)
    pub rate_limit_per_sec: Option<u32>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            workers: None,
            request_timeout_secs: 30,
            max_retries: 1,
            backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            queue_policy: QueuePolicy::Fifo,
            sink_buffer: 1_024,
            rate_limit_per_sec: None,
        }
    }
}

impl CrawlerConfig {
    /// Number of worker tasks to spawn
    pub fn worker_count(&self) -> u32 {
        self.workers.unwrap_or(self.concurrency)
    }

    /// Request-rate quota, if one is set
    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.rate_limit_per_sec.and_then(NonZeroU32::new)
    }
}

/// Initial target sources; any combination may be set
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SeedConfig {
    /// Explicit start targets
    pub urls: Vec<String>,

    /// Inclusive numeric ID range
    pub range: Option<IdRange>,

    /// Page-list expansion
    pub pages: Option<PageSeed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

/// `count` pages starting at `first`, each substituted into `template`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PageSeed {
    pub template: String,
    #[serde(default = "default_first_page")]
    pub first: u64,
    pub count: u64,
}

fn default_first_page() -> u64 {
    1
}

/// How a target is turned into a request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TargetConfig {
    /// URL for non-URL targets; `{}` is replaced by the target
    pub url_template: Option<String>,

    /// Query parameter that carries the target identifier
    pub id_param: Option<String>,

    /// Static query parameters added to every request
    pub params: BTreeMap<String, String>,

    /// Sign every request with the key ring's current keys
    pub sign: bool,
}

/// Rules mapping a response to a fetch outcome
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClassifyConfig {
    /// JSON pointer to a service status code inside the body (e.g. `/code`)
    pub code_pointer: Option<String>,

    pub success_codes: Vec<i64>,
    pub not_found_codes: Vec<i64>,
    pub rate_limited_codes: Vec<i64>,
    pub auth_codes: Vec<i64>,

    pub not_found_statuses: Vec<u16>,
    pub rate_limited_statuses: Vec<u16>,
    pub auth_statuses: Vec<u16>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            code_pointer: None,
            success_codes: vec![0],
            not_found_codes: Vec::new(),
            rate_limited_codes: Vec::new(),
            auth_codes: Vec::new(),
            not_found_statuses: vec![404, 410],
            rate_limited_statuses: vec![429],
            auth_statuses: Vec::new(),
        }
    }
}

/// Payload format handled by the extractor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractKind {
    #[default]
    Json,
    Html,
}

/// What to keep from a payload and where to find new targets
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExtractConfig {
    pub kind: ExtractKind,

    /// Emit a record for each successful fetch
    pub emit_records: bool,

    /// JSON pointer to the sub-tree stored as the record (whole body if unset)
    pub record_pointer: Option<String>,

    /// JSON pointer to an array of discovered items
    pub discover_pointer: Option<String>,

    /// JSON pointer applied to each discovered item
    pub discover_item_pointer: Option<String>,

    /// Template turning a discovered item into a target (`{}` = item)
    pub discover_template: Option<String>,

    /// JSON pointer to a "next page" cursor
    pub next_pointer: Option<String>,

    /// Template turning a cursor into the next target (`{}` = cursor)
    pub next_template: Option<String>,

    /// Domain patterns that discovered HTML links must match (empty = any)
    pub allowed_domains: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            kind: ExtractKind::Json,
            emit_records: true,
            record_pointer: None,
            discover_pointer: None,
            discover_item_pointer: None,
            discover_template: None,
            next_pointer: None,
            next_template: None,
            allowed_domains: Vec::new(),
        }
    }
}

/// Pools the rotator picks from
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IdentityConfig {
    pub user_agents: Vec<String>,

    /// Proxy endpoints; `"direct"` means no proxy
    pub proxies: Vec<String>,
}

/// Where signing keys come from and when they are refreshed
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SigningConfig {
    pub img_key: Option<String>,
    pub sub_key: Option<String>,

    /// Endpoint returning `data.wbi_img.{img_url,sub_url}`
    pub nav_url: Option<String>,

    /// Scheduled refresh cadence (0 disables the schedule)
    pub refresh_interval_secs: u64,

    /// Consecutive auth rejections that force a refresh
    pub auth_failure_threshold: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            img_key: None,
            sub_key: None,
            nav_url: None,
            refresh_interval_secs: 3_600,
            auth_failure_threshold: 3,
        }
    }
}

/// Frontier deployment mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontierMode {
    #[default]
    Local,
    Shared,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FrontierConfig {
    pub mode: FrontierMode,
    pub redis_url: String,
    pub queue_key: String,
    pub seen_key: String,

    /// How often shared mode checks for an idle queue (seconds)
    pub idle_poll_secs: u64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            mode: FrontierMode::Local,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            queue_key: "trawl:queue".to_string(),
            seen_key: "trawl:seen".to_string(),
            idle_poll_secs: 30,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the JSON-lines records file
    #[serde(rename = "records-path")]
    pub records_path: String,
}
