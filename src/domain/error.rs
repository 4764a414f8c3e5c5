use thiserror::Error;

/// Top-level error type for the forwarder pipeline.
///
/// Only `Config`, `Client`, `Bootstrap`, `AlreadyRunning` and `FlushTimeout` are
/// ever returned to callers. The remaining variants describe events that were
/// dropped in the background; they are counted and written to the local sink
/// instead of being propagated.
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Bootstrap of destination '{destination}' failed: {reason}")]
    Bootstrap { destination: String, reason: String },

    #[error("Forwarder already running")]
    AlreadyRunning,

    #[error("Flush deadline exceeded with {pending} events still pending")]
    FlushTimeout { pending: usize },

    #[error("Queue overflow: dropped {dropped} event(s)")]
    QueueOverflow { dropped: u64 },

    #[error("Dispatch of batch {batch_id} failed: {reason}")]
    DispatchFailure { batch_id: String, reason: String },

    #[error(
        "Dropped batch {batch_id} ({events} events) after {attempts} attempts: {last_error}"
    )]
    DispatchExhausted {
        batch_id: String,
        events: usize,
        attempts: u32,
        last_error: String,
    },

    #[error("Destination rejected {events} event(s) of batch {batch_id}: {reason}")]
    Rejected {
        batch_id: String,
        events: usize,
        reason: String,
    },

    #[error("Dropped {events} event(s) at shutdown")]
    ShutdownDropped { events: usize },
}
