//! In-process frontier
//!
//! A mutex-protected seen-set and queue plus a `Notify` for waking idle
//! workers. The frontier tracks how many popped targets are still being
//! processed; once the seeder has sealed it and nothing is queued or in
//! flight, it closes itself so every worker drains to `None`.

use crate::frontier::{Frontier, FrontierError, QueuePolicy, Target};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct State {
    seen: HashSet<Target>,
    queue: VecDeque<Target>,
    in_flight: usize,
    sealed: bool,
    closed: bool,
}

impl State {
    fn next(&mut self, policy: QueuePolicy) -> Option<Target> {
        match policy {
            QueuePolicy::Fifo => self.queue.pop_front(),
            QueuePolicy::Lifo => self.queue.pop_back(),
        }
    }

    /// Closes the frontier if it is sealed and idle; returns true on transition
    fn close_if_idle(&mut self) -> bool {
        if !self.closed && self.sealed && self.queue.is_empty() && self.in_flight == 0 {
            self.closed = true;
            return true;
        }
        false
    }
}

/// In-process frontier scoped to a single run
pub struct LocalFrontier {
    state: Mutex<State>,
    notify: Notify,
    policy: QueuePolicy,
}

impl LocalFrontier {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of distinct targets admitted so far
    pub fn seen_count(&self) -> usize {
        self.lock().seen.len()
    }

    /// Returns true once the frontier has closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl Frontier for LocalFrontier {
    async fn try_seed(&self, target: Target) -> Result<bool, FrontierError> {
        {
            let mut state = self.lock();
            if state.closed {
                tracing::debug!("Frontier closed, ignoring {}", target);
                return Ok(false);
            }
            if !state.seen.insert(target.clone()) {
                return Ok(false);
            }
            state.queue.push_back(target);
        }

        self.notify.notify_waiters();
        Ok(true)
    }

    async fn pop(&self) -> Result<Option<Target>, FrontierError> {
        loop {
            // Registered before the state check so a push between the check and
            // the await still wakes us
            let notified = self.notify.notified();

            {
                let mut state = self.lock();
                if let Some(target) = state.next(self.policy) {
                    state.in_flight += 1;
                    return Ok(Some(target));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn task_done(&self) {
        let closed = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.close_if_idle()
        };

        if closed {
            tracing::debug!("Frontier drained, closing");
            self.notify.notify_waiters();
        }
    }

    async fn seal(&self) {
        let closed = {
            let mut state = self.lock();
            state.sealed = true;
            state.close_if_idle()
        };

        if closed {
            self.notify.notify_waiters();
        }
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    async fn queued(&self) -> Result<usize, FrontierError> {
        Ok(self.lock().queue.len())
    }
}
