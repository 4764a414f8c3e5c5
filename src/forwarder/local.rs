//! Local fallback sink.
//!
//! Used as the only sink when remote forwarding is disabled, and as the
//! last-resort channel for reporting dropped events when it is enabled.

use crate::domain::{ForwarderError, LogEvent, Severity};
use clap::ValueEnum;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// `[timestamp LVL] rendered message`.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalTarget {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSinkConfig {
    pub target: LocalTarget,
    pub format: LocalFormat,
}

#[derive(Serialize)]
struct LocalRecord<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    level: &'static str,
    message: String,
    message_template: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: &'a BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a str>,
}

pub struct LocalSink {
    writer: Mutex<Box<dyn Write + Send>>,
    format: LocalFormat,
}

impl LocalSink {
    pub fn new(config: &LocalSinkConfig) -> Result<Self, ForwarderError> {
        let writer: Box<dyn Write + Send> = match &config.target {
            LocalTarget::Stdout => Box::new(io::stdout()),
            LocalTarget::Stderr => Box::new(io::stderr()),
            LocalTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        ForwarderError::Config(format!(
                            "Cannot open local sink file {}: {e}",
                            path.display()
                        ))
                    })?;
                Box::new(io::LineWriter::new(file))
            }
        };
        Ok(Self::from_writer(writer, config.format))
    }

    pub fn from_writer(writer: impl Write + Send + 'static, format: LocalFormat) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            format,
        }
    }

    pub fn stdout() -> Self {
        Self::from_writer(io::stdout(), LocalFormat::Json)
    }

    pub fn format(&self) -> LocalFormat {
        self.format
    }

    /// Writes one event synchronously. I/O errors are reported on stderr and
    /// otherwise ignored.
    pub fn emit(&self, event: &LogEvent) {
        let line = match self.format {
            LocalFormat::Json => format_json(event),
            LocalFormat::Text => format_text(event),
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(line.as_bytes()) {
            eprintln!("elk-forwarder: local sink write failed: {e}");
        }
    }

    /// Reports a background failure as an internal event.
    pub fn report(&self, error: &ForwarderError) {
        let level = match error {
            ForwarderError::QueueOverflow { .. } | ForwarderError::Bootstrap { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        };
        let event = LogEvent::new(level, "{SourceContext}: {Error}")
            .with_property("SourceContext", env!("CARGO_PKG_NAME"))
            .with_property("Error", error.to_string());
        self.emit(&event);
    }

    pub fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            eprintln!("elk-forwarder: local sink flush failed: {e}");
        }
    }
}

fn format_json(event: &LogEvent) -> String {
    let record = LocalRecord {
        timestamp: event
            .timestamp()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        level: event.level().as_str(),
        message: event.render(),
        message_template: event.message_template(),
        properties: event.properties(),
        exception: event.exception(),
    };
    match serde_json::to_string(&record) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(_) => format_text(event),
    }
}

fn format_text(event: &LogEvent) -> String {
    let mut line = format!(
        "[{} {}] {}\n",
        event.timestamp().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        event.level().short_code(),
        event.render()
    );
    if let Some(exception) = event.exception() {
        line.push_str(exception);
        line.push('\n');
    }
    line
}
