use crate::forwarder::LogForwarder;
#[cfg(feature = "metrics")]
use crate::reliability::PrometheusExporter;
#[cfg(feature = "metrics")]
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: LogForwarder,
    #[cfg(feature = "metrics")]
    pub prometheus: Arc<PrometheusExporter>,
}

impl AppState {
    pub fn new(forwarder: LogForwarder) -> Result<Self, super::ServiceError> {
        Ok(Self {
            forwarder,
            #[cfg(feature = "metrics")]
            prometheus: Arc::new(PrometheusExporter::new()?),
        })
    }
}
