//! Target generation
//!
//! Turns the `[seed]` configuration into targets and admits them into a
//! frontier. Three kinds of sources can be combined:
//! - explicit start URLs
//! - an inclusive numeric ID range (IDs are mapped to URLs at fetch time)
//! - a page-list expansion (`template` with `{}` replaced by page numbers)

use crate::config::SeedConfig;
use crate::frontier::{Frontier, FrontierError, Target};
use tokio_util::sync::CancellationToken;

/// How often the seeder reports progress and checks for cancellation
const PROGRESS_EVERY: u64 = 10_000;

/// One source of initial targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSource {
    /// Explicit targets
    Urls(Vec<String>),

    /// Inclusive numeric ID range
    Range { start: u64, end: u64 },

    /// Page-list expansion
    Pages {
        template: String,
        first: u64,
        count: u64,
    },
}

impl SeedSource {
    /// Number of targets this source produces
    pub fn len(&self) -> u64 {
        match self {
            Self::Urls(urls) => urls.len() as u64,
            Self::Range { start, end } if end < start => 0,
            // Saturates for the full `0..=u64::MAX` range
            Self::Range { start, end } => (end - start).saturating_add(1),
            Self::Pages { first, count, .. } => first.saturating_add(*count) - first,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily produces the targets of this source
    pub fn targets(&self) -> Box<dyn Iterator<Item = Target> + Send + '_> {
        match self {
            Self::Urls(urls) => Box::new(urls.iter().map(|url| Target::new(url.as_str()))),
            Self::Range { start, end } => Box::new((*start..=*end).map(Target::from_id)),
            Self::Pages {
                template,
                first,
                count,
            } => Box::new(
                (*first..first.saturating_add(*count))
                    .map(move |page| Target::new(expand(template, page))),
            ),
        }
    }
}

/// Replaces every `{}` in `template` with `value`
pub fn expand(template: &str, value: impl std::fmt::Display) -> String {
    template.replace("{}", &value.to_string())
}

/// The full seed specification of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedPlan {
    pub sources: Vec<SeedSource>,
}

impl SeedPlan {
    /// Builds the plan from configuration
    pub fn from_config(config: &SeedConfig) -> Self {
        let mut sources = Vec::new();

        if !config.urls.is_empty() {
            sources.push(SeedSource::Urls(config.urls.clone()));
        }

        if let Some(range) = &config.range {
            sources.push(SeedSource::Range {
                start: range.start,
                end: range.end,
            });
        }

        if let Some(pages) = &config.pages {
            sources.push(SeedSource::Pages {
                template: pages.template.clone(),
                first: pages.first,
                count: pages.count,
            });
        }

        Self { sources }
    }

    /// Total number of targets the plan produces (before deduplication)
    pub fn len(&self) -> u64 {
        self.sources
            .iter()
            .map(SeedSource::len)
            .fold(0, u64::saturating_add)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn targets(&self) -> impl Iterator<Item = Target> + Send + '_ {
        self.sources.iter().flat_map(|source| source.targets())
    }
}

/// Outcome of a seeding pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Targets offered to the frontier
    pub offered: u64,

    /// Targets the frontier admitted as new
    pub admitted: u64,

    /// True if cancellation stopped seeding early
    pub cancelled: bool,
}

/// Admits every target of `plan` into `frontier`
///
/// Seeding stops early when `cancel` fires. The frontier is not sealed here;
/// the caller decides whether more targets may follow.
pub async fn seed_frontier(
    plan: &SeedPlan,
    frontier: &dyn Frontier,
    cancel: &CancellationToken,
) -> Result<SeedSummary, FrontierError> {
    let mut summary = SeedSummary::default();
    let total = plan.len();

    for target in plan.targets() {
        if summary.offered % PROGRESS_EVERY == 0 && summary.offered > 0 {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            tracing::info!(
                "Seeded {} / {} targets ({} new)",
                summary.offered,
                total,
                summary.admitted
            );
            // Let workers make progress on very large seed sets
            tokio::task::yield_now().await;
        }

        summary.offered += 1;
        if frontier.try_seed(target).await? {
            summary.admitted += 1;
        }
    }

    tracing::info!(
        "Seeding finished: {} offered, {} admitted",
        summary.offered,
        summary.admitted
    );

    Ok(summary)
}
