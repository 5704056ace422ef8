//! Crawl frontier: the seen-set plus the queue of pending targets
//!
//! Workers only touch the frontier through the [`Frontier`] trait:
//! - `try_seed` is the sole admission path (atomic check-and-insert)
//! - `pop` hands out each admitted target exactly once
//!
//! Two implementations exist:
//! - [`LocalFrontier`]: in-process, scoped to one run, closes itself when sealed and idle
//! - [`SharedFrontier`]: backed by a [`SharedStore`] (e.g. Redis) so several
//!   processes can feed and drain one frontier; runs until cancelled

mod local;
mod shared;
mod target;

pub use local::LocalFrontier;
pub use shared::{MemoryStore, RedisStore, SharedFrontier, SharedStore};
pub use target::Target;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised by a frontier backend
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Shared store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Shared store unavailable: {0}")]
    Unavailable(String),
}

/// Order in which queued targets are handed out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Oldest target first
    #[default]
    Fifo,

    /// Newest target first
    Lifo,
}

/// The frontier contract shared by local and distributed deployments
#[async_trait]
pub trait Frontier: Send + Sync {
    /// Admits `target` if it has never been seen
    ///
    /// Returns true only for the call that actually inserted the target; only
    /// that call enqueues it.
    async fn try_seed(&self, target: Target) -> Result<bool, FrontierError>;

    /// Removes one queued target, waiting while the queue is empty
    ///
    /// Returns `Ok(None)` once the frontier is closed and drained.
    async fn pop(&self) -> Result<Option<Target>, FrontierError>;

    /// Reports that a popped target has been fully processed
    async fn task_done(&self) {}

    /// Reports that the seeder will not add any more targets
    async fn seal(&self) {}

    /// Releases every waiting `pop` caller
    fn close(&self) {}

    /// Number of targets currently queued
    async fn queued(&self) -> Result<usize, FrontierError>;
}
