//! Bounded pending queue shared by producers and the dispatch loop.
//!
//! A mutex-protected ring buffer (`VecDeque` with a fixed capacity). Producers
//! push synchronously; the dispatch loop waits on [`PendingQueue::notified`]
//! and drains in FIFO order.

use crate::domain::LogEvent;
use clap::ValueEnum;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;

/// What to do with a new event when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room for the new one.
    #[default]
    DropOldest,
    /// Discard the new event and keep the queue untouched.
    DropNewest,
    /// Wait up to `QueueConfig::block_timeout` for room, then discard the new event.
    /// This blocks the calling thread.
    Block,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub block_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            overflow_policy: OverflowPolicy::DropOldest,
            block_timeout: Duration::from_millis(100),
        }
    }
}

/// Result of a single push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// The event was queued and the oldest event was evicted.
    EvictedOldest,
    /// The queue stayed full and the new event was discarded.
    Rejected,
}

impl PushOutcome {
    pub fn dropped(&self) -> u64 {
        match self {
            PushOutcome::Accepted => 0,
            PushOutcome::EvictedOldest | PushOutcome::Rejected => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: LogEvent,
    pub enqueued_at: Instant,
}

pub struct PendingQueue {
    inner: Mutex<VecDeque<QueuedEvent>>,
    not_full: Condvar,
    not_empty: Notify,
    config: QueueConfig,
}

impl PendingQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            not_full: Condvar::new(),
            not_empty: Notify::new(),
            config,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.config.overflow_policy
    }

    pub fn push(&self, event: LogEvent) -> PushOutcome {
        let queued = QueuedEvent {
            event,
            enqueued_at: Instant::now(),
        };

        let mut inner = self.inner.lock();
        let mut outcome = PushOutcome::Accepted;

        if inner.len() >= self.config.capacity {
            match self.config.overflow_policy {
                OverflowPolicy::DropOldest => {
                    inner.pop_front();
                    outcome = PushOutcome::EvictedOldest;
                }
                OverflowPolicy::DropNewest => return PushOutcome::Rejected,
                OverflowPolicy::Block => {
                    let deadline = std::time::Instant::now() + self.config.block_timeout;
                    while inner.len() >= self.config.capacity {
                        if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                            break;
                        }
                    }
                    if inner.len() >= self.config.capacity {
                        return PushOutcome::Rejected;
                    }
                }
            }
        }

        inner.push_back(queued);
        drop(inner);

        self.not_empty.notify_one();
        outcome
    }

    /// Removes up to `max` events from the front of the queue.
    pub fn drain(&self, max: usize) -> Vec<QueuedEvent> {
        let mut inner = self.inner.lock();
        let count = max.min(inner.len());
        let drained: Vec<QueuedEvent> = inner.drain(..count).collect();
        drop(inner);

        if !drained.is_empty() {
            self.not_full.notify_all();
        }
        drained
    }

    pub fn drain_all(&self) -> Vec<QueuedEvent> {
        self.drain(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Resolves after the next successful push. A push that happened while
    /// nobody was waiting is remembered, so no wakeup is lost between a
    /// drain and the following wait.
    pub fn notified(&self) -> Notified<'_> {
        self.not_empty.notified()
    }
}
