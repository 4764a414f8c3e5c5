//! Domain layer for elk-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: an immutable structured log record
//! - `Severity`: Trace/Debug/Information/Warning/Error/Fatal
//! - `ForwarderError`: Top-level error type

pub mod error;
pub mod log_event;
pub mod severity;

pub use error::ForwarderError;
pub use log_event::LogEvent;
pub use severity::Severity;
