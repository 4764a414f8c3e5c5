use super::config::{Config, ConfigError};
use super::router::{build_router, route_listing};
use super::server;
use super::state::AppState;
use crate::domain::ForwarderError;
use crate::forwarder::LogForwarder;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Forwarder error: {0}")]
    Forwarder(#[from] ForwarderError),
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "metrics")]
    #[error("Metrics error: {0}")]
    Metrics(#[from] crate::reliability::MetricsError),
}

/// Owns the forwarder for the lifetime of the demo API.
pub struct Service {
    config: Config,
    forwarder: LogForwarder,
}

impl Service {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let forwarder = LogForwarder::new(config.to_forwarder_config())?;
        Ok(Self { config, forwarder })
    }

    pub fn forwarder(&self) -> &LogForwarder {
        &self.forwarder
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the forwarder, serves HTTP until SIGINT/SIGTERM, then stops
    /// the forwarder. A bootstrap failure under the `fail` policy returns
    /// before the listener is bound.
    pub async fn run(self) -> Result<(), ServiceError> {
        self.forwarder.start().await?;

        let state = AppState::new(self.forwarder.clone())?;
        let routes = route_listing(self.forwarder.is_enabled());
        let served = server::serve(build_router(state), self.config.http_port, &routes).await;
        if let Err(e) = &served {
            error!(error = %e, "HTTP server failed");
        }

        self.forwarder.stop().await;
        info!("Service stopped");
        served
    }
}
