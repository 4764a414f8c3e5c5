use super::serialization::{BulkSerializer, SerializationError, classify_bulk_response};
use super::{BulkExporter, ClientError, Destination, ExportFuture, ExportOutcome, HttpClient};
use crate::buffer::Batch;
use reqwest::Method;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] SerializationError),
    #[error("Client error: {0}")]
    ClientError(#[from] ClientError),
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Transmission timeout")]
    Timeout,
    #[error("Bulk request rejected with HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// Sends batches to `{endpoint}/{destination}/_bulk`.
#[derive(Clone)]
pub struct BatchTransmitter {
    client: HttpClient,
    serializer: BulkSerializer,
    destination: Destination,
    bulk_url: Url,
}

impl BatchTransmitter {
    pub fn new(client: HttpClient, destination: Destination) -> Self {
        let bulk_url = client.url_for(&format!("{}/_bulk", destination.name()));
        Self {
            serializer: BulkSerializer::new(&destination),
            client,
            destination,
            bulk_url,
        }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn bulk_url(&self) -> &Url {
        &self.bulk_url
    }

    pub async fn send_batch(&self, batch: &Batch) -> Result<ExportOutcome, TransmissionError> {
        let start = Instant::now();
        let compress = self.client.config().enable_compression;

        let payload = if compress {
            self.serializer.serialize_compressed(batch)?
        } else {
            self.serializer.serialize_ndjson(batch)?
        };
        let bytes_sent = payload.len();

        let response = self
            .client
            .request(Method::POST, self.bulk_url.clone())
            .headers(build_headers(compress))
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                self.client.stats().record_request(false, start.elapsed());
                if e.is_timeout() {
                    TransmissionError::Timeout
                } else {
                    TransmissionError::RequestError(e)
                }
            })?;

        let status = response.status();
        let latency = start.elapsed();
        self.client.stats().record_request(status.is_success(), latency);

        let body = response.bytes().await?;

        if !status.is_success() {
            warn!(
                batch_id = batch.id(),
                status = status.as_u16(),
                "Bulk request for {} failed",
                self.destination
            );
            return Err(TransmissionError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(512).collect(),
            });
        }

        let outcome = classify_bulk_response(&body, batch.size());
        debug!(
            batch_id = batch.id(),
            events = batch.size(),
            accepted = outcome.accepted,
            retryable = outcome.retryable.len(),
            rejected = outcome.rejected.len(),
            bytes_sent,
            ?latency,
            "Bulk request completed"
        );
        Ok(outcome)
    }
}

fn build_headers(compressed: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    if compressed {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    headers
}

impl BulkExporter for BatchTransmitter {
    fn export<'a>(&'a self, batch: &'a Batch) -> ExportFuture<'a> {
        Box::pin(self.send_batch(batch))
    }

    fn bootstrap(&self) -> Pin<Box<dyn Future<Output = Result<(), TransmissionError>> + Send + '_>> {
        Box::pin(async move {
            self.client.verify_destination(&self.destination).await?;
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.destination, self.client.endpoint())
    }
}
