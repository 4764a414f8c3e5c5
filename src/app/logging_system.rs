use super::config::{LogFormat, LogLevel};
use super::layer::ForwarderLayer;
use super::service::ServiceError;
use crate::forwarder::LogForwarder;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Chatty dependencies held at `warn` regardless of the configured level.
pub const QUIET_TARGETS: [&str; 5] = ["hyper", "reqwest", "h2", "tower", "rustls"];

pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 1);
    parts.push(level.as_str().to_string());
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    parts.join(",")
}

fn console_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    }
}

/// Installs the global subscriber: console diagnostics on stderr plus the
/// bridge that feeds application events into `forwarder`.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(
    level: LogLevel,
    format: LogFormat,
    forwarder: &LogForwarder,
) -> Result<(), ServiceError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(build_filter_string(level))
            .map_err(|e| ServiceError::Logging(e.to_string()))?,
    };

    tracing_subscriber::registry()
        .with(console_layer(format))
        .with(filter)
        .with(ForwarderLayer::new(forwarder.clone()))
        .try_init()
        .map_err(|e| ServiceError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_string() {
        let filter = build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
