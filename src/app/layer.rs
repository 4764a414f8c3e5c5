use crate::domain::{LogEvent, Severity};
use crate::forwarder::LogForwarder;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Targets never forwarded. The pipeline's own diagnostics and the HTTP
/// client stack would otherwise feed back into the queue they describe.
const EXCLUDED_TARGETS: &[&str] = &[
    "elk_forwarder::forwarder",
    "elk_forwarder::sender",
    "elk_forwarder::buffer",
    "elk_forwarder::reliability",
    "reqwest",
    "hyper",
    "h2",
    "rustls",
    "tower",
];

/// Converts `tracing` events into [`LogEvent`]s and enqueues them.
///
/// The `message` field becomes the template, an `error` field becomes the
/// exception detail, and every other field becomes a property. The event
/// target is recorded as `SourceContext`.
pub struct ForwarderLayer {
    forwarder: LogForwarder,
}

impl ForwarderLayer {
    pub fn new(forwarder: LogForwarder) -> Self {
        Self { forwarder }
    }

    pub fn is_excluded(target: &str) -> bool {
        EXCLUDED_TARGETS.iter().any(|prefix| target.starts_with(prefix))
    }
}

impl<S: Subscriber> Layer<S> for ForwarderLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if Self::is_excluded(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(Severity::from(metadata.level()), visitor.message)
            .with_property("SourceContext", metadata.target());
        for (name, value) in visitor.properties {
            log_event = log_event.with_property(name, value);
        }
        if let Some(exception) = visitor.exception {
            log_event = log_event.with_exception(exception);
        }

        self.forwarder.enqueue(log_event);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    exception: Option<String>,
    properties: BTreeMap<String, Value>,
}

impl FieldVisitor {
    fn record_value(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            "error" => {
                self.exception = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            name => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut detail = value.to_string();
        let mut source = value.source();
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        self.record_value(field, Value::String(detail));
    }
}
