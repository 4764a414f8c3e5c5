//! Background dispatch loop.
//!
//! A single task drains the pending queue into a [`BatchFormer`], seals
//! batches on size or delay, and hands them to a pool of at most
//! `max_concurrency` delivery tasks. Acquiring a pool permit is the only
//! place the loop waits on delivery, so a saturated pool slows draining but
//! never producers.

use super::local::LocalSink;
use crate::buffer::{Batch, BatchFormer, PendingQueue, SealReason};
use crate::domain::ForwarderError;
use crate::reliability::{ForwarderMetrics, RetryPolicy};
use crate::sender::BulkExporter;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) enum Control {
    /// Seal everything pending, wait for all deliveries, reply with the
    /// number of events sealed.
    Flush { reply: oneshot::Sender<usize> },
}

enum Wake {
    Cancelled,
    Control(Option<Control>),
    Enqueued,
    DelayElapsed,
    Reaped,
}

/// Collaborators shared by the loop and every delivery task.
#[derive(Clone)]
pub(crate) struct DeliveryContext {
    pub exporter: Arc<dyn BulkExporter>,
    pub retry: RetryPolicy,
    pub metrics: Arc<ForwarderMetrics>,
    pub local: Arc<LocalSink>,
}

pub(crate) struct Dispatcher {
    queue: Arc<PendingQueue>,
    former: BatchFormer,
    ctx: DeliveryContext,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<()>,
    control: mpsc::Receiver<Control>,
    cancel: CancellationToken,
    dropped_unsent: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        queue: Arc<PendingQueue>,
        former: BatchFormer,
        ctx: DeliveryContext,
        max_concurrency: usize,
        control: mpsc::Receiver<Control>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            former,
            ctx,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            in_flight: JoinSet::new(),
            control,
            cancel,
            dropped_unsent: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(
            max_batch_size = self.former.config().max_size,
            max_batch_delay_ms = self.former.config().max_delay.as_millis() as u64,
            "Dispatch loop started"
        );

        loop {
            self.drain_queue().await;
            if self.cancel.is_cancelled() {
                break;
            }

            let deadline = self.former.deadline();
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                cmd = self.control.recv() => Wake::Control(cmd),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    log_join_error(joined);
                    Wake::Reaped
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Wake::DelayElapsed
                }
                _ = self.queue.notified() => Wake::Enqueued,
            };

            match wake {
                Wake::Cancelled => break,
                Wake::Control(Some(Control::Flush { reply })) => {
                    let flushed = self.flush().await;
                    // The caller may have given up waiting.
                    let _ = reply.send(flushed);
                }
                // Every handle is gone; nothing can flush or stop us anymore.
                Wake::Control(None) => {
                    self.flush().await;
                    break;
                }
                Wake::DelayElapsed => {
                    if let Some(batch) = self.former.seal(SealReason::DelayElapsed) {
                        self.dispatch(batch).await;
                    }
                }
                Wake::Enqueued | Wake::Reaped => {}
            }
        }

        self.shutdown().await;
    }

    /// Moves queued events into the former, sealing whenever it fills up or
    /// the pending batch is overdue.
    async fn drain_queue(&mut self) {
        loop {
            if self.former.is_due(Instant::now()) {
                if let Some(batch) = self.former.seal(SealReason::DelayElapsed) {
                    self.dispatch(batch).await;
                }
            }

            let drained = self.queue.drain(self.former.remaining_capacity());
            if drained.is_empty() {
                return;
            }
            for queued in drained {
                self.former.push(queued);
            }

            if self.former.is_full() {
                if let Some(batch) = self.former.seal(SealReason::SizeLimit) {
                    self.dispatch(batch).await;
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }
        }
    }

    async fn flush(&mut self) -> usize {
        let mut flushed = 0;
        loop {
            let drained = self.queue.drain(self.former.remaining_capacity());
            let queue_empty = drained.is_empty() && self.queue.is_empty();
            for queued in drained {
                self.former.push(queued);
            }
            if self.former.is_full() || queue_empty {
                if let Some(batch) = self.former.seal(SealReason::Flush) {
                    flushed += batch.size();
                    self.dispatch(batch).await;
                }
            }
            if queue_empty || self.cancel.is_cancelled() {
                break;
            }
        }

        while !self.in_flight.is_empty() {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(joined) = self.in_flight.join_next() => log_join_error(joined),
            }
        }

        debug!(events = flushed, "Flush completed");
        flushed
    }

    async fn dispatch(&mut self, batch: Batch) {
        self.ctx.metrics.record_sealed();
        debug!(
            batch_id = batch.id(),
            events = batch.size(),
            reason = ?batch.seal_reason(),
            "Batch sealed"
        );

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit,
            _ = self.cancel.cancelled() => {
                self.dropped_unsent += batch.size();
                return;
            }
        };
        let Ok(permit) = permit else {
            // The semaphore is never closed; treat it like a shutdown.
            self.dropped_unsent += batch.size();
            return;
        };

        let guard = InFlight::begin(&self.ctx.metrics, batch.size());
        self.in_flight
            .spawn(deliver(batch, self.ctx.clone(), permit, guard));
    }

    async fn shutdown(&mut self) {
        let shutdown_before = self.ctx.metrics.snapshot().dropped_shutdown;

        self.in_flight.abort_all();
        while self.in_flight.join_next().await.is_some() {}

        let pending = self.dropped_unsent + self.former.len() + self.queue.drain_all().len();
        self.ctx.metrics.record_shutdown_drop(pending);

        let dropped = (self.ctx.metrics.snapshot().dropped_shutdown - shutdown_before) as usize;
        if dropped > 0 {
            warn!(events = dropped, "Dropped undelivered events at shutdown");
            self.ctx
                .local
                .report(&ForwarderError::ShutdownDropped { events: dropped });
        }
        info!("Dispatch loop stopped");
    }
}

/// Tracks a batch from spawn to settlement. If the delivery task is aborted
/// before settling, the outstanding events are counted as shutdown drops.
struct InFlight {
    metrics: Arc<ForwarderMetrics>,
    dispatched: usize,
    outstanding: usize,
}

impl InFlight {
    fn begin(metrics: &Arc<ForwarderMetrics>, events: usize) -> Self {
        metrics.begin_dispatch(events);
        Self {
            metrics: Arc::clone(metrics),
            dispatched: events,
            outstanding: events,
        }
    }

    fn settle(&mut self) {
        self.outstanding = 0;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.outstanding > 0 {
            self.metrics.record_shutdown_drop(self.outstanding);
        }
        self.metrics.end_dispatch(self.dispatched);
    }
}

/// Sends one batch, retrying the failed part until it is accepted, rejected
/// or out of retries.
async fn deliver(
    mut batch: Batch,
    ctx: DeliveryContext,
    _permit: OwnedSemaphorePermit,
    mut guard: InFlight,
) {
    let mut retries_done = 0;

    loop {
        ctx.metrics.record_attempt();

        let last_error = match ctx.exporter.export(&batch).await {
            Ok(outcome) => {
                ctx.metrics.record_delivered(outcome.accepted);

                if !outcome.rejected.is_empty() {
                    let reason = outcome
                        .rejected
                        .first()
                        .map(|r| format!("HTTP {}: {}", r.status, r.reason))
                        .unwrap_or_default();
                    let err = ForwarderError::Rejected {
                        batch_id: batch.id().to_string(),
                        events: outcome.rejected.len(),
                        reason,
                    };
                    warn!(error = %err, "Bulk items rejected");
                    ctx.metrics.record_rejected(outcome.rejected.len());
                    ctx.local.report(&err);
                }

                if outcome.is_complete() {
                    ctx.metrics.record_batch_delivered();
                    debug!(
                        batch_id = batch.id(),
                        accepted = outcome.accepted,
                        attempts = retries_done + 1,
                        "Batch delivered"
                    );
                    guard.settle();
                    return;
                }

                let retryable = outcome.retryable.len();
                guard.outstanding = retryable;
                batch = batch.retain(&outcome.retryable);
                format!("{retryable} event(s) failed with a retryable status")
            }
            Err(e) => e.to_string(),
        };

        if !ctx.retry.should_retry(retries_done) {
            let err = ForwarderError::DispatchExhausted {
                batch_id: batch.id().to_string(),
                events: batch.size(),
                attempts: retries_done + 1,
                last_error,
            };
            error!(error = %err, "Giving up on batch");
            ctx.metrics.record_exhausted(batch.size());
            ctx.local.report(&err);
            guard.settle();
            return;
        }

        let delay = ctx.retry.calculate_delay(retries_done);
        retries_done += 1;
        ctx.metrics.record_retry();
        warn!(
            error = %ForwarderError::DispatchFailure {
                batch_id: batch.id().to_string(),
                reason: last_error,
            },
            retry = retries_done,
            delay_ms = delay.as_millis() as u64,
            "Retrying batch"
        );
        sleep(delay).await;
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Delivery task panicked");
        }
    }
}
