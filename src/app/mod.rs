pub mod config;
pub mod handler;
pub mod layer;
pub mod logging_system;
pub mod middleware;
pub mod router;
pub mod server;
pub mod service;
pub mod state;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use layer::ForwarderLayer;
pub use logging_system::init_logging;
pub use service::{Service, ServiceError};

use tracing::info;

pub struct App {
    service: Service,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Self::from_config(config)
    }

    /// Builds the forwarder and installs logging. The forwarder is not
    /// started yet; [`App::run`] does that.
    pub fn from_config(config: Config) -> Result<Self, ServiceError> {
        let service = Service::new(config)?;
        let config = service.config();
        init_logging(config.log_level, config.log_format, service.forwarder())?;

        info!("Starting elk-forwarder v{}", crate::VERSION);
        match (service.forwarder().endpoint(), service.forwarder().destination()) {
            (Some(endpoint), Some(destination)) => info!(
                endpoint,
                destination = %destination,
                max_concurrency = config.max_concurrency,
                "Forwarding logs to Elasticsearch"
            ),
            _ => info!("Elasticsearch sink disabled, using the local sink"),
        }

        Ok(Self { service })
    }

    pub async fn run(self) -> Result<(), ServiceError> {
        self.service.run().await
    }
}

// Main entry point for the application
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = match App::from_args(std::env::args_os()) {
        Ok(app) => app,
        // --help and --version land here too; clap prints and picks the exit code.
        Err(ServiceError::Config(ConfigError::Cli(e))) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    app.run().await?;
    Ok(())
}
