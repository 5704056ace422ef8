//! Frontier shared between processes through a key-value service
//!
//! The store only needs two capabilities:
//! - an atomic "add to set, tell me if it was new" primitive
//! - a list with push, a pop that waits a bounded time, and length
//!
//! Targets are always pushed on the left; FIFO pops from the right and LIFO
//! from the left. A shared frontier never closes: it runs until the caller
//! cancels, and idleness is observed by polling `queued()`.

use crate::frontier::{Frontier, FrontierError, QueuePolicy, Target};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Capability interface of the external frontier service
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Adds `member` to the set at `key`; returns true if it was not present
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, FrontierError>;

    /// Pushes `value` onto the left end of the list at `key`
    async fn push(&self, key: &str, value: &str) -> Result<(), FrontierError>;

    /// Pops one value, waiting up to `timeout` for the list to become non-empty
    async fn pop_wait(
        &self,
        key: &str,
        policy: QueuePolicy,
        timeout: Duration,
    ) -> Result<Option<String>, FrontierError>;

    /// Length of the list at `key`
    async fn len(&self, key: &str) -> Result<usize, FrontierError>;
}

/// Redis-backed store (`SADD`, `LPUSH`, `RPOP`/`LPOP`, `LLEN`)
///
/// Every command shares one multiplexed connection, and Redis answers a
/// connection's commands in order. Pops therefore never block server-side:
/// they poll with non-blocking `RPOP`/`LPOP` so a waiting worker cannot hold
/// up pushes and set additions queued behind it.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

/// Pause between empty polls of the Redis list
const REDIS_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl RedisStore {
    /// Connects to the Redis server at `url`
    pub async fn connect(url: &str) -> Result<Self, FrontierError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, FrontierError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added == 1)
    }

    async fn push(&self, key: &str, value: &str) -> Result<(), FrontierError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn pop_wait(
        &self,
        key: &str,
        policy: QueuePolicy,
        timeout: Duration,
    ) -> Result<Option<String>, FrontierError> {
        let command = match policy {
            QueuePolicy::Fifo => "RPOP",
            QueuePolicy::Lifo => "LPOP",
        };
        poll_until(timeout, REDIS_POLL_INTERVAL, || {
            let mut conn = self.conn.clone();
            async move {
                let value: Option<String> =
                    redis::cmd(command).arg(key).query_async(&mut conn).await?;
                Ok(value)
            }
        })
        .await
    }

    async fn len(&self, key: &str) -> Result<usize, FrontierError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }
}

/// Retries `attempt` every `interval` until it yields a value or `timeout` passes
///
/// `attempt` always runs at least once, even with a zero timeout.
async fn poll_until<F, Fut, T>(
    timeout: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<Option<T>, FrontierError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, FrontierError>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = attempt().await? {
            return Ok(Some(value));
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-process implementation of the shared store capability
///
/// Useful for running the shared-frontier code path without a server, and for
/// tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, FrontierError> {
        Ok(self
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn push(&self, key: &str, value: &str) -> Result<(), FrontierError> {
        self.lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_wait(
        &self,
        key: &str,
        policy: QueuePolicy,
        timeout: Duration,
    ) -> Result<Option<String>, FrontierError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();

            {
                let mut state = self.lock();
                if let Some(list) = state.lists.get_mut(key) {
                    let value = match policy {
                        QueuePolicy::Fifo => list.pop_back(),
                        QueuePolicy::Lifo => list.pop_front(),
                    };
                    if value.is_some() {
                        return Ok(value);
                    }
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, key: &str) -> Result<usize, FrontierError> {
        Ok(self.lock().lists.get(key).map_or(0, VecDeque::len))
    }
}

/// Frontier whose seen-set and queue live in a [`SharedStore`]
pub struct SharedFrontier<S: SharedStore> {
    store: S,
    queue_key: String,
    seen_key: String,
    policy: QueuePolicy,
    poll_timeout: Duration,
}

impl<S: SharedStore> SharedFrontier<S> {
    /// Creates a shared frontier
    ///
    /// # Arguments
    ///
    /// * `store` - The backing store
    /// * `queue_key` - List holding pending targets
    /// * `seen_key` - Set holding every admitted target
    /// * `policy` - Pop order
    pub fn new(
        store: S,
        queue_key: impl Into<String>,
        seen_key: impl Into<String>,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            store,
            queue_key: queue_key.into(),
            seen_key: seen_key.into(),
            policy,
            poll_timeout: Duration::from_secs(1),
        }
    }

    /// Sets how long a single store pop waits before trying again
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }
}

#[async_trait]
impl<S: SharedStore> Frontier for SharedFrontier<S> {
    async fn try_seed(&self, target: Target) -> Result<bool, FrontierError> {
        if !self.store.add_to_set(&self.seen_key, target.as_str()).await? {
            return Ok(false);
        }
        self.store.push(&self.queue_key, target.as_str()).await?;
        Ok(true)
    }

    // Never returns `None`: a shared frontier has no close signal. Callers stop
    // it through cancellation; a pop abandoned mid-flight may lose that one
    // target, which at-most-once delivery allows.
    async fn pop(&self) -> Result<Option<Target>, FrontierError> {
        loop {
            if let Some(value) = self
                .store
                .pop_wait(&self.queue_key, self.policy, self.poll_timeout)
                .await?
            {
                return Ok(Some(Target::new(value)));
            }
        }
    }

    async fn queued(&self) -> Result<usize, FrontierError> {
        self.store.len(&self.queue_key).await
    }
}
