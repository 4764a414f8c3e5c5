// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned
)]
// Noisy pedantic lints suppressed:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Millisecond durations and counters stay in range
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. ForwarderConfig in forwarder module
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

pub mod app;
pub mod buffer;
pub mod domain;
pub mod forwarder;
pub mod reliability;
pub mod sender;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-export main types for easy access
pub use app::{App, Config};
pub use domain::{ForwarderError, LogEvent, Severity};
pub use forwarder::{ForwarderConfig, LogForwarder};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
