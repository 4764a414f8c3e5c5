//! Shared test support utilities
//!
//! In-memory replacements for the bulk endpoint and the local writer, used by
//! unit and integration tests.

use crate::buffer::{Batch, SealReason};
use crate::domain::LogEvent;
use crate::sender::{BulkExporter, ExportFuture, ExportOutcome, TransmissionError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Cloneable `Write` target that keeps everything in memory.
#[derive(Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Lines that parse as JSON; anything else is skipped.
    pub fn json_lines(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One call to [`MockExporter::export`].
#[derive(Debug, Clone)]
pub struct ExportCall {
    pub batch_id: String,
    pub seal_reason: SealReason,
    pub events: Vec<LogEvent>,
    pub at: Instant,
    pub succeeded: bool,
}

impl ExportCall {
    pub fn messages(&self) -> Vec<String> {
        self.events.iter().map(LogEvent::render).collect()
    }
}

/// Mock exporter that captures exported batches for testing.
///
/// By default every export succeeds. Failures can be injected for every
/// call, for the next `n` calls, or as scripted per-item outcomes.
#[derive(Default)]
pub struct MockExporter {
    calls: Mutex<Vec<ExportCall>>,
    scripted: Mutex<VecDeque<ExportOutcome>>,
    should_fail: AtomicBool,
    fail_next: AtomicU32,
    bootstrap_fails: AtomicBool,
    bootstrap_calls: AtomicUsize,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn set_bootstrap_fails(&self, fail: bool) {
        self.bootstrap_fails.store(fail, Ordering::SeqCst);
    }

    /// Each export sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Queues an outcome returned by the next successful export instead of
    /// full acceptance.
    pub fn script_outcome(&self, outcome: ExportOutcome) {
        self.scripted.lock().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<ExportCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn bootstrap_calls(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    /// Batches whose export returned `Ok`, in completion order.
    pub fn delivered(&self) -> Vec<ExportCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.succeeded)
            .cloned()
            .collect()
    }

    /// Rendered messages of every event in a successful export.
    pub fn delivered_messages(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .flat_map(ExportCall::messages)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail_now(&self) -> bool {
        if self.should_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl BulkExporter for MockExporter {
    fn export<'a>(&'a self, batch: &'a Batch) -> ExportFuture<'a> {
        Box::pin(async move {
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            let at = Instant::now();
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let failed = self.should_fail_now();
            self.calls.lock().push(ExportCall {
                batch_id: batch.id().to_string(),
                seal_reason: batch.seal_reason(),
                events: batch.events().to_vec(),
                at,
                succeeded: !failed,
            });
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if failed {
                return Err(TransmissionError::HttpStatus {
                    status: 503,
                    body: "Mock export failure".to_string(),
                });
            }

            let scripted = self.scripted.lock().pop_front();
            Ok(scripted.unwrap_or_else(|| ExportOutcome::all_accepted(batch.size())))
        })
    }

    fn bootstrap(&self) -> Pin<Box<dyn Future<Output = Result<(), TransmissionError>> + Send + '_>> {
        Box::pin(async move {
            self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
            if self.bootstrap_fails.load(Ordering::SeqCst) {
                return Err(TransmissionError::HttpStatus {
                    status: 403,
                    body: "Mock bootstrap failure".to_string(),
                });
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
