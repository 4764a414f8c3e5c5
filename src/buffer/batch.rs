use super::queue::QueuedEvent;
use crate::domain::LogEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Why a batch was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealReason {
    SizeLimit,
    DelayElapsed,
    Flush,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_size: usize,
    pub max_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// An ordered, sealed group of events dispatched as one bulk request.
///
/// There is no way to mutate a batch after construction. Retrying a subset
/// produces a new batch through [`Batch::retain`].
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    events: Vec<LogEvent>,
    seal_reason: SealReason,
    sealed_at: Instant,
}

impl Batch {
    pub fn new(events: Vec<LogEvent>, seal_reason: SealReason) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
            seal_reason,
            sealed_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn seal_reason(&self) -> SealReason {
        self.seal_reason
    }

    pub fn sealed_at(&self) -> Instant {
        self.sealed_at
    }

    /// Consumes the batch and returns a new one, with the same id, holding
    /// only the events at `positions`. Relative order is preserved and
    /// out-of-range positions are ignored.
    pub fn retain(self, positions: &[usize]) -> Batch {
        let mut keep = vec![false; self.events.len()];
        for &p in positions {
            if let Some(slot) = keep.get_mut(p) {
                *slot = true;
            }
        }

        let events = self
            .events
            .into_iter()
            .zip(keep)
            .filter_map(|(event, keep)| keep.then_some(event))
            .collect();

        Batch {
            id: self.id,
            events,
            seal_reason: self.seal_reason,
            sealed_at: Instant::now(),
        }
    }
}

/// Accumulates queued events into the next batch.
///
/// A batch is due when it holds `max_size` events, or when `max_delay` has
/// passed since its first event was enqueued.
pub struct BatchFormer {
    config: BatchConfig,
    pending: Vec<LogEvent>,
    first_enqueued_at: Option<Instant>,
}

impl BatchFormer {
    pub fn new(config: BatchConfig) -> Self {
        let pending = Vec::with_capacity(config.max_size.min(4096));
        Self {
            config,
            pending,
            first_enqueued_at: None,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.config.max_size.saturating_sub(self.pending.len())
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.config.max_size
    }

    pub fn push(&mut self, queued: QueuedEvent) {
        if self.pending.is_empty() {
            self.first_enqueued_at = Some(queued.enqueued_at);
        }
        self.pending.push(queued.event);
    }

    /// Instant at which the pending batch must be sealed by the delay rule.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_enqueued_at.map(|t| t + self.config.max_delay)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    pub fn seal(&mut self, reason: SealReason) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        self.first_enqueued_at = None;
        let events = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.max_size.min(4096)),
        );
        Some(Batch::new(events, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn queued(name: &str, enqueued_at: Instant) -> QueuedEvent {
        QueuedEvent {
            event: LogEvent::new(Severity::Information, name),
            enqueued_at,
        }
    }

    fn names(batch: &Batch) -> Vec<&str> {
        batch.events().iter().map(|e| e.message_template()).collect()
    }

    #[test]
    fn test_former_full_after_max_size() {
        let mut former = BatchFormer::new(BatchConfig {
            max_size: 3,
            max_delay: Duration::from_secs(1),
        });
        let now = Instant::now();

        former.push(queued("A", now));
        former.push(queued("B", now));
        assert!(!former.is_full());
        assert_eq!(former.remaining_capacity(), 1);

        former.push(queued("C", now));
        assert!(former.is_full());

        let batch = former.seal(SealReason::SizeLimit).unwrap();
        assert_eq!(names(&batch), vec!["A", "B", "C"]);
        assert_eq!(batch.seal_reason(), SealReason::SizeLimit);
        assert!(former.is_empty());
        assert!(former.deadline().is_none());
    }

    #[test]
    fn test_deadline_tracks_first_event() {
        let mut former = BatchFormer::new(BatchConfig {
            max_size: 10,
            max_delay: Duration::from_millis(1000),
        });
        let t0 = Instant::now();

        former.push(queued("A", t0));
        former.push(queued("B", t0 + Duration::from_millis(400)));

        assert_eq!(former.deadline(), Some(t0 + Duration::from_millis(1000)));
        assert!(!former.is_due(t0 + Duration::from_millis(999)));
        assert!(former.is_due(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_seal_empty_returns_none() {
        let mut former = BatchFormer::new(BatchConfig::default());
        assert!(former.seal(SealReason::Flush).is_none());
    }

    #[test]
    fn test_retain_keeps_order_and_id() {
        let events = ["A", "B", "C", "D"]
            .iter()
            .map(|n| LogEvent::new(Severity::Information, *n))
            .collect();
        let batch = Batch::new(events, SealReason::Flush);
        let id = batch.id().to_string();

        let retried = batch.retain(&[3, 1, 42]);
        assert_eq!(retried.id(), id);
        assert_eq!(names(&retried), vec!["B", "D"]);
    }
}
