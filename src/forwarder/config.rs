use super::local::LocalSinkConfig;
use crate::buffer::{BatchConfig, OverflowPolicy, QueueConfig};
use crate::domain::ForwarderError;
use crate::reliability::RetryConfig;
use crate::sender::{ClientConfig, Credentials, Destination};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `start()` does when the destination check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapFailurePolicy {
    /// `start()` returns an error and the host should not serve traffic.
    #[default]
    Fail,
    /// Log a warning and keep going.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Remote forwarding on/off. When off, events go to the local sink.
    pub enabled: bool,
    pub endpoint: String,
    pub destination: Destination,
    pub max_concurrency: usize,
    pub max_batch_size: usize,
    pub max_batch_delay: Duration,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub block_timeout: Duration,
    pub verify_destination: bool,
    pub bootstrap_failure_policy: BootstrapFailurePolicy,
    pub retry: RetryConfig,
    pub credentials: Option<Credentials>,
    pub request_timeout: Duration,
    pub enable_compression: bool,
    pub shutdown_timeout: Duration,
    pub local_sink: LocalSinkConfig,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:9200".to_string(),
            destination: Destination::default(),
            max_concurrency: 10,
            max_batch_size: 1_000,
            max_batch_delay: Duration::from_secs(5),
            queue_capacity: 100_000,
            overflow_policy: OverflowPolicy::default(),
            block_timeout: Duration::from_millis(100),
            verify_destination: true,
            bootstrap_failure_policy: BootstrapFailurePolicy::default(),
            retry: RetryConfig::default(),
            credentials: None,
            request_timeout: Duration::from_secs(30),
            enable_compression: false,
            shutdown_timeout: Duration::from_secs(10),
            local_sink: LocalSinkConfig::default(),
        }
    }
}

impl ForwarderConfig {
    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.max_concurrency == 0 {
            return Err(ForwarderError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ForwarderError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_delay.is_zero() {
            return Err(ForwarderError::Config(
                "max_batch_delay must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity < self.max_batch_size {
            return Err(ForwarderError::Config(format!(
                "queue_capacity ({}) must be at least max_batch_size ({})",
                self.queue_capacity, self.max_batch_size
            )));
        }
        if self.destination.name().is_empty() {
            return Err(ForwarderError::Config(
                "destination name cannot be empty".to_string(),
            ));
        }
        self.retry
            .validate()
            .map_err(|e| ForwarderError::Config(e.to_string()))?;

        if self.enabled {
            let url = url::Url::parse(&self.endpoint)
                .map_err(|e| ForwarderError::Config(format!("Invalid endpoint URL: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ForwarderError::Config(format!(
                    "Endpoint must use http or https, got {}",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.request_timeout,
            max_connections: self.max_concurrency,
            enable_compression: self.enable_compression,
            credentials: self.credentials.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy,
            block_timeout: self.block_timeout,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_size: self.max_batch_size,
            max_delay: self.max_batch_delay,
        }
    }
}
