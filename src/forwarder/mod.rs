//! The log forwarder handle.
//!
//! [`LogForwarder`] is an explicitly constructed, cheaply cloneable handle.
//! The sink variant is chosen once at construction: `Remote` batches events
//! and ships them through a [`BulkExporter`]; `Local` writes each event to
//! the [`LocalSink`] synchronously.

pub mod config;
mod dispatch;
pub mod local;

pub use config::{BootstrapFailurePolicy, ForwarderConfig};
pub use local::{LocalFormat, LocalSink, LocalSinkConfig, LocalTarget};

use crate::buffer::{BatchFormer, PendingQueue};
use crate::domain::{ForwarderError, LogEvent};
use crate::reliability::{ForwarderMetrics, MetricsSnapshot, RetryPolicy};
use crate::sender::{BatchTransmitter, BulkExporter, Destination, HttpClient};
use dispatch::{Control, DeliveryContext, Dispatcher};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct LogForwarder {
    inner: Arc<Inner>,
}

struct Inner {
    config: ForwarderConfig,
    sink: Sink,
    metrics: Arc<ForwarderMetrics>,
    local: Arc<LocalSink>,
}

enum Sink {
    Remote(Remote),
    Local,
}

struct Remote {
    exporter: Arc<dyn BulkExporter>,
    queue: Arc<PendingQueue>,
    lifecycle: Mutex<Lifecycle>,
    stopped: AtomicBool,
    overflow_reported: AtomicU64,
}

enum Lifecycle {
    Idle,
    Starting,
    Running {
        control: mpsc::Sender<Control>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Overflow drops are reported to the local sink at most once per this many.
const OVERFLOW_REPORT_INTERVAL: u64 = 1_000;

impl LogForwarder {
    /// Builds a forwarder from configuration. With `enabled` set, batches go
    /// to the Elasticsearch `_bulk` API at `config.endpoint`.
    pub fn new(config: ForwarderConfig) -> Result<Self, ForwarderError> {
        config.validate()?;
        let local = LocalSink::new(&config.local_sink)?;

        if !config.enabled {
            return Ok(Self::build(config, None, local));
        }

        let client = HttpClient::new(config.client_config())
            .map_err(|e| ForwarderError::Client(e.to_string()))?;
        let transmitter = BatchTransmitter::new(client, config.destination.clone());
        Ok(Self::build(config, Some(Arc::new(transmitter)), local))
    }

    /// Builds a forwarder around an arbitrary exporter and local sink.
    /// The exporter is ignored when `config.enabled` is false.
    pub fn with_exporter(
        config: ForwarderConfig,
        exporter: Arc<dyn BulkExporter>,
        local: LocalSink,
    ) -> Result<Self, ForwarderError> {
        config.validate()?;
        let exporter = config.enabled.then_some(exporter);
        Ok(Self::build(config, exporter, local))
    }

    fn build(
        config: ForwarderConfig,
        exporter: Option<Arc<dyn BulkExporter>>,
        local: LocalSink,
    ) -> Self {
        let sink = match exporter {
            Some(exporter) => Sink::Remote(Remote {
                exporter,
                queue: Arc::new(PendingQueue::new(config.queue_config())),
                lifecycle: Mutex::new(Lifecycle::Idle),
                stopped: AtomicBool::new(false),
                overflow_reported: AtomicU64::new(0),
            }),
            None => Sink::Local,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                metrics: Arc::new(ForwarderMetrics::new()),
                local: Arc::new(local),
            }),
        }
    }

    /// Verifies the destination (when configured to) and spawns the
    /// dispatch loop. Must be called from within a tokio runtime.
    pub async fn start(&self) -> Result<(), ForwarderError> {
        let Sink::Remote(remote) = &self.inner.sink else {
            info!("Remote forwarding disabled, writing events to the local sink");
            return Ok(());
        };

        {
            let mut lifecycle = remote.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Starting,
                Lifecycle::Starting | Lifecycle::Running { .. } => {
                    return Err(ForwarderError::AlreadyRunning);
                }
                Lifecycle::Stopped => {
                    return Err(ForwarderError::Config(
                        "forwarder has been stopped and cannot be restarted".to_string(),
                    ));
                }
            }
        }

        if let Err(e) = self.bootstrap(remote).await {
            *remote.lifecycle.lock() = Lifecycle::Idle;
            return Err(e);
        }

        let config = &self.inner.config;
        let (control_tx, control_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&remote.queue),
            BatchFormer::new(config.batch_config()),
            DeliveryContext {
                exporter: Arc::clone(&remote.exporter),
                retry: RetryPolicy::new(config.retry.clone()),
                metrics: Arc::clone(&self.inner.metrics),
                local: Arc::clone(&self.inner.local),
            },
            config.max_concurrency,
            control_rx,
            cancel.clone(),
        );
        let task = tokio::spawn(dispatcher.run());

        *remote.lifecycle.lock() = Lifecycle::Running {
            control: control_tx,
            cancel,
            task,
        };

        info!(
            destination = %remote.exporter.describe(),
            max_concurrency = config.max_concurrency,
            max_batch_size = config.max_batch_size,
            "Log forwarder started"
        );
        Ok(())
    }

    async fn bootstrap(&self, remote: &Remote) -> Result<(), ForwarderError> {
        let config = &self.inner.config;
        if !config.verify_destination {
            debug!("Destination verification disabled");
            return Ok(());
        }

        match remote.exporter.bootstrap().await {
            Ok(()) => {
                debug!(destination = %remote.exporter.describe(), "Destination verified");
                Ok(())
            }
            Err(e) => {
                let err = ForwarderError::Bootstrap {
                    destination: remote.exporter.describe(),
                    reason: e.to_string(),
                };
                match config.bootstrap_failure_policy {
                    BootstrapFailurePolicy::Fail => Err(err),
                    BootstrapFailurePolicy::Ignore => {
                        warn!(error = %err, "Destination bootstrap failed, continuing");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Hands an event to the forwarder. Never fails and, except under the
    /// `block` overflow policy, never waits.
    ///
    /// `block` parks the calling thread for up to `block_timeout`; avoid it on
    /// async worker threads that cannot afford the stall.
    pub fn enqueue(&self, event: LogEvent) {
        let metrics = &self.inner.metrics;

        let remote = match &self.inner.sink {
            Sink::Remote(remote) if !remote.stopped.load(Ordering::Acquire) => remote,
            _ => {
                self.inner.local.emit(&event);
                metrics.record_written_locally();
                return;
            }
        };

        metrics.record_enqueued();
        let dropped = remote.queue.push(event).dropped();
        if dropped == 0 {
            return;
        }

        let total = metrics.record_overflow(dropped);
        // Claim the span since the last report. Totals observed by other
        // producers may be ahead of ours, so never move the mark backwards.
        let claimed = remote
            .overflow_reported
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |reported| {
                let due = total > reported
                    && (reported == 0 || total - reported >= OVERFLOW_REPORT_INTERVAL);
                due.then_some(total)
            });
        if let Ok(reported) = claimed {
            self.inner.local.report(&ForwarderError::QueueOverflow {
                dropped: total - reported,
            });
        }
    }

    /// Seals everything pending, dispatches it and waits for every
    /// in-flight delivery to settle. Returns the number of events sealed by
    /// this call.
    pub async fn flush(&self, deadline: Duration) -> Result<usize, ForwarderError> {
        let Sink::Remote(remote) = &self.inner.sink else {
            self.inner.local.flush();
            return Ok(0);
        };

        let control = match &*remote.lifecycle.lock() {
            Lifecycle::Running { control, .. } => control.clone(),
            _ => {
                self.inner.local.flush();
                return Ok(0);
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            control
                .send(Control::Flush { reply: reply_tx })
                .await
                .ok()?;
            reply_rx.await.ok()
        };

        match tokio::time::timeout(deadline, exchange).await {
            Ok(Some(flushed)) => Ok(flushed),
            // The loop went away mid-flush, which only happens on stop.
            Ok(None) => Ok(0),
            Err(_) => Err(ForwarderError::FlushTimeout {
                pending: self.pending(),
            }),
        }
    }

    /// Flushes within `shutdown_timeout`, then cancels the dispatch loop.
    /// Whatever the loop still holds afterwards is dropped and counted.
    /// Events enqueued once `stop` has begun go to the local sink.
    pub async fn stop(&self) {
        let Sink::Remote(remote) = &self.inner.sink else {
            self.inner.local.flush();
            return;
        };

        remote.stopped.store(true, Ordering::Release);
        let shutdown_timeout = self.inner.config.shutdown_timeout;
        match self.flush(shutdown_timeout).await {
            Ok(flushed) => debug!(events = flushed, "Final flush completed"),
            Err(e) => warn!(error = %e, "Final flush did not complete"),
        }

        let previous = std::mem::replace(&mut *remote.lifecycle.lock(), Lifecycle::Stopped);

        if let Lifecycle::Running { cancel, task, .. } = previous {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }

        // Producers that passed the stopped check just before it flipped.
        for straggler in remote.queue.drain_all() {
            self.inner.local.emit(&straggler.event);
            self.inner.metrics.record_written_locally();
        }
        self.inner.local.flush();

        let snapshot = self.inner.metrics.snapshot();
        info!(
            delivered = snapshot.delivered,
            dropped = snapshot.dropped_total(),
            "Log forwarder stopped"
        );
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.inner.sink, Sink::Remote(_))
    }

    pub fn is_running(&self) -> bool {
        match &self.inner.sink {
            Sink::Remote(remote) => matches!(*remote.lifecycle.lock(), Lifecycle::Running { .. }),
            Sink::Local => false,
        }
    }

    /// Events accepted but not yet handed to the exporter, plus events in flight.
    pub fn pending(&self) -> usize {
        match &self.inner.sink {
            Sink::Remote(remote) => {
                remote.queue.len() + self.inner.metrics.snapshot().in_flight_events
            }
            Sink::Local => 0,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.inner.config
    }

    /// Endpoint URL when remote forwarding is enabled.
    pub fn endpoint(&self) -> Option<&str> {
        self.is_enabled().then_some(self.inner.config.endpoint.as_str())
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.is_enabled().then_some(&self.inner.config.destination)
    }
}

impl std::fmt::Debug for LogForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogForwarder")
            .field("enabled", &self.is_enabled())
            .field("endpoint", &self.endpoint())
            .field("destination", &self.destination())
            .finish()
    }
}
