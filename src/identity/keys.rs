//! Signing key ring
//!
//! Holds the current [`SigningKeyPair`] and replaces it as a whole, so readers
//! never observe half of an update. Every installed pair gets a new
//! generation number; callers report failures against the generation they
//! used, which lets concurrent reports collapse into a single refresh.

use crate::signing::{mixin_key, SigningKeyPair};
use crate::{Result, TrawlError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Where fresh signing keys come from
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<SigningKeyPair>;
}

/// Keys fixed in configuration; a refresh returns the same pair
pub struct StaticKeySource {
    pair: SigningKeyPair,
}

impl StaticKeySource {
    pub fn new(pair: SigningKeyPair) -> Self {
        Self { pair }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<SigningKeyPair> {
        mixin_key(&self.pair.img_key, &self.pair.sub_key)?;
        Ok(self.pair.clone())
    }
}

/// Reads the keys from the service's navigation endpoint
///
/// The endpoint answers with `data.wbi_img.img_url` and `data.wbi_img.sub_url`;
/// each key is the file stem of its URL.
pub struct NavKeySource {
    client: reqwest::Client,
    url: String,
}

impl NavKeySource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

/// Extracts the file stem of a key URL (`.../7cd0...77c.png` → `7cd0...77c`)
fn key_from_url(url: &str) -> Option<&str> {
    let file = url.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    (!stem.is_empty()).then_some(stem)
}

#[async_trait]
impl KeySource for NavKeySource {
    async fn fetch(&self) -> Result<SigningKeyPair> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| TrawlError::Http {
                url: self.url.clone(),
                source,
            })?;

        let body: serde_json::Value = response.json().await.map_err(|source| TrawlError::Http {
            url: self.url.clone(),
            source,
        })?;

        let field = |pointer: &str| {
            body.pointer(pointer)
                .and_then(|v| v.as_str())
                .and_then(key_from_url)
                .map(str::to_string)
                .ok_or_else(|| {
                    TrawlError::KeySource(format!("{} missing from {}", pointer, self.url))
                })
        };

        let img_key = field("/data/wbi_img/img_url")?;
        let sub_key = field("/data/wbi_img/sub_url")?;

        // Reject keys that cannot produce a mixing key before installing them
        mixin_key(&img_key, &sub_key)?;

        Ok(SigningKeyPair::new(img_key, sub_key))
    }
}

/// One installed key pair and its generation
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    pub generation: u64,
    pub pair: Arc<SigningKeyPair>,
}

/// Current signing keys plus the refresh policy around them
pub struct KeyRing {
    source: Box<dyn KeySource>,
    current: RwLock<Option<KeySnapshot>>,
    refresh_lock: Mutex<()>,
    failures: AtomicU32,
    failure_threshold: u32,
}

impl KeyRing {
    /// Creates an empty key ring
    ///
    /// # Arguments
    ///
    /// * `source` - Where keys are loaded from
    /// * `failure_threshold` - Consecutive auth failures that force a refresh
    pub fn new(source: Box<dyn KeySource>, failure_threshold: u32) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Loads the first key pair; the run cannot sign anything until this succeeds
    pub async fn initialize(&self) -> Result<KeySnapshot> {
        self.refresh_after(0).await
    }

    /// The pair currently installed, if any
    pub async fn current(&self) -> Option<KeySnapshot> {
        self.current.read().await.clone()
    }

    /// Replaces the keys unless someone already did since `seen_generation`
    ///
    /// Callers racing on the same generation are serialized: the first one
    /// fetches new keys, the rest get that result without fetching again.
    pub async fn refresh_after(&self, seen_generation: u64) -> Result<KeySnapshot> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(snapshot) = self.current().await {
            if snapshot.generation > seen_generation {
                return Ok(snapshot);
            }
        }

        let pair = self.source.fetch().await?;
        let mut current = self.current.write().await;
        let generation = current.as_ref().map_or(0, |s| s.generation) + 1;
        let snapshot = KeySnapshot {
            generation,
            pair: Arc::new(pair),
        };
        *current = Some(snapshot.clone());
        self.failures.store(0, Ordering::SeqCst);

        tracing::info!("Installed signing keys (generation {})", generation);
        Ok(snapshot)
    }

    /// Records an auth rejection seen with keys of `generation`
    ///
    /// Returns true if the keys were refreshed (by this call or a concurrent
    /// one) and a retry may succeed.
    pub async fn report_auth_failure(&self, generation: u64) -> bool {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.failure_threshold {
            return false;
        }

        tracing::warn!(
            "{} consecutive signature rejections, refreshing keys",
            failures
        );
        match self.refresh_after(generation).await {
            Ok(snapshot) => snapshot.generation > generation,
            Err(e) => {
                tracing::warn!("Key refresh failed: {}", e);
                false
            }
        }
    }

    /// Resets the consecutive-failure count after an accepted request
    pub fn report_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    /// Refreshes the keys every `interval` until `cancel` fires
    pub async fn run_refresh_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; keys were just initialized
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let generation = self.current().await.map_or(0, |s| s.generation);
                    if let Err(e) = self.refresh_after(generation).await {
                        tracing::warn!("Scheduled key refresh failed: {}", e);
                    }
                }
            }
        }
    }
}
