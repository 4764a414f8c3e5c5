use super::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A structured log event as emitted by application code.
///
/// Events are immutable once built: the builder methods consume `self`, and
/// there are no setters. The message is kept as a template such as
/// `"HTTP {RequestMethod} {RequestPath} responded {StatusCode}"` whose
/// placeholders are resolved against `properties` by [`LogEvent::render`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    timestamp: DateTime<Utc>,
    level: Severity,
    message_template: String,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exception: Option<String>,
}

impl LogEvent {
    pub fn new(level: Severity, message_template: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message_template: message_template.into(),
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> Severity {
        self.level
    }

    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    /// Renders the message template against the event properties.
    ///
    /// `{Name}`, `{@Name}`, `{$Name}` and `{Name:format}` are replaced by the
    /// property value; strings are written without quotes. `{{` and `}}` are
    /// literal braces. Placeholders without a matching property are kept as-is.
    pub fn render(&self) -> String {
        let template = self.message_template.as_str();
        let mut out = String::with_capacity(template.len() + 16);
        let mut rest = template;

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                out.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }

            if tail.starts_with('}') {
                out.push('}');
                rest = &tail[1..];
                continue;
            }

            let Some(end) = tail.find('}') else {
                out.push_str(tail);
                rest = "";
                break;
            };

            let token = &tail[1..end];
            let name = token
                .trim_start_matches(['@', '$'])
                .split([':', ','])
                .next()
                .unwrap_or_default();

            match self.properties.get(name) {
                Some(Value::String(s)) => out.push_str(s),
                Some(value) => out.push_str(&value.to_string()),
                None => out.push_str(&tail[..=end]),
            }
            rest = &tail[end + 1..];
        }

        out.push_str(rest);
        out
    }
}
