pub mod client;
pub mod serialization;
pub mod transmission;

pub use client::{
    ClientConfig, ClientError, ConnectionStats, Credentials, Destination, HttpClient,
};
pub use serialization::{
    BulkSerializer, ExportOutcome, ItemRejection, SerializationError, classify_bulk_response,
};
pub use transmission::{BatchTransmitter, TransmissionError};

use crate::buffer::Batch;
use std::future::Future;
use std::pin::Pin;

pub type ExportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ExportOutcome, TransmissionError>> + Send + 'a>>;

/// Port through which sealed batches leave the process.
///
/// The HTTP implementation is [`BatchTransmitter`]; tests plug in
/// in-memory exporters.
pub trait BulkExporter: Send + Sync {
    /// Sends one batch as a single bulk request.
    fn export<'a>(&'a self, batch: &'a Batch) -> ExportFuture<'a>;

    /// Verifies (and if needed creates) the destination.
    fn bootstrap(&self) -> Pin<Box<dyn Future<Output = Result<(), TransmissionError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    /// Human-readable destination, used in diagnostics.
    fn describe(&self) -> String;
}
