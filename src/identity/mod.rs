//! Per-attempt request identity
//!
//! The [`Rotator`] picks a user agent and a proxy endpoint for every fetch
//! attempt. It does not enforce rate limits; back-off is the worker pool's job.
//! Signing keys live in the [`KeyRing`], which the pool consults alongside
//! the rotator.

mod keys;

pub use keys::{KeyRing, KeySnapshot, KeySource, NavKeySource, StaticKeySource};

use crate::config::IdentityConfig;
use rand::seq::IndexedRandom;

/// User agent used when none are configured
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; sumi-trawl/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Returns true for proxy entries that mean "connect directly"
pub fn is_direct(proxy: &str) -> bool {
    matches!(
        proxy.trim().to_ascii_lowercase().as_str(),
        "direct" | "none" | ""
    )
}

/// Identity presented by one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_agent: String,

    /// Proxy endpoint, or `None` for a direct connection
    pub proxy: Option<String>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

/// Random choice over the configured identity pools
#[derive(Debug, Clone)]
pub struct Rotator {
    user_agents: Vec<String>,
    proxies: Vec<Option<String>>,
}

impl Rotator {
    pub fn new(config: &IdentityConfig) -> Self {
        let user_agents = if config.user_agents.is_empty() {
            vec![DEFAULT_USER_AGENT.to_string()]
        } else {
            config.user_agents.clone()
        };

        let proxies = if config.proxies.is_empty() {
            vec![None]
        } else {
            config
                .proxies
                .iter()
                .map(|p| (!is_direct(p)).then(|| p.trim().to_string()))
                .collect()
        };

        Self {
            user_agents,
            proxies,
        }
    }

    /// Picks the identity for the next attempt; consecutive picks may repeat
    pub fn next(&self) -> Identity {
        let mut rng = rand::rng();
        let user_agent = self
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let proxy = self.proxies.choose(&mut rng).cloned().flatten();

        Identity { user_agent, proxy }
    }

    /// Every proxy endpoint the rotator can hand out
    pub fn proxy_endpoints(&self) -> &[Option<String>] {
        &self.proxies
    }
}
