use super::{ConfigError, LogFormat, LogLevel};
use crate::buffer::OverflowPolicy;
use crate::forwarder::{
    BootstrapFailurePolicy, ForwarderConfig, LocalFormat, LocalSinkConfig, LocalTarget,
};
use crate::reliability::{RetryConfig, RetryStrategy};
use crate::sender::{Credentials, Destination};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Forward logs to Elasticsearch instead of the local sink
    #[arg(long, env = "WITH_ELASTICSEARCH_SINK")]
    pub with_elasticsearch_sink: bool,

    /// Elasticsearch endpoint URL
    #[arg(long, env = "ELASTICSEARCH_URL", default_value = "http://localhost:9200")]
    pub elasticsearch_url: String,

    /// Data stream type
    #[arg(long, env = "DATA_STREAM_TYPE", default_value = "logs")]
    pub data_stream_type: String,

    /// Data stream dataset
    #[arg(long, env = "DATA_STREAM_DATASET", default_value = "console-example")]
    pub data_stream_dataset: String,

    /// Data stream namespace
    #[arg(long, env = "DATA_STREAM_NAMESPACE", default_value = "demo")]
    pub data_stream_namespace: String,

    /// Plain index to write to instead of a data stream
    #[arg(long, env = "ELASTICSEARCH_INDEX")]
    pub index: Option<String>,

    /// Maximum concurrent bulk requests
    #[arg(long, env = "MAX_CONCURRENCY", default_value = "10")]
    pub max_concurrency: usize,

    /// Number of events per bulk request
    #[arg(long, env = "BATCH_SIZE", default_value = "1000")]
    pub batch_size: usize,

    /// Maximum age of a pending batch in milliseconds
    #[arg(long, env = "BATCH_DELAY_MS", default_value = "5000")]
    pub batch_delay_ms: u64,

    /// Pending queue capacity
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "100000")]
    pub queue_capacity: usize,

    /// What to do when the pending queue is full
    #[arg(long, env = "OVERFLOW_POLICY", default_value = "drop-oldest")]
    pub overflow_policy: OverflowPolicy,

    /// Longest wait under the block overflow policy, in milliseconds
    #[arg(long, env = "BLOCK_TIMEOUT_MS", default_value = "100")]
    pub block_timeout_ms: u64,

    /// Skip the destination existence check at startup
    #[arg(long, env = "SKIP_BOOTSTRAP")]
    pub skip_bootstrap: bool,

    /// Startup behaviour when the destination check fails
    #[arg(long, env = "BOOTSTRAP_FAILURE", default_value = "fail")]
    pub bootstrap_failure: BootstrapFailurePolicy,

    /// Retries per batch after the first attempt
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "500")]
    pub retry_base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "60000")]
    pub retry_max_delay_ms: u64,

    /// Basic auth username
    #[arg(long, env = "ELASTICSEARCH_USERNAME")]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "ELASTICSEARCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Encoded API key, sent as `Authorization: ApiKey <key>`
    #[arg(long, env = "ELASTICSEARCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Bulk request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Gzip bulk request bodies
    #[arg(long, env = "ENABLE_COMPRESSION")]
    pub enable_compression: bool,

    /// Time allowed for the final flush, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
    pub shutdown_timeout_secs: u64,

    /// Append local sink output to this file instead of stdout
    #[arg(long, env = "LOCAL_SINK_PATH")]
    pub local_sink_path: Option<PathBuf>,

    /// Local sink line format
    #[arg(long, env = "LOCAL_SINK_FORMAT", default_value = "json")]
    pub local_sink_format: LocalFormat,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Diagnostic output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// HTTP port of the demo API
    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    pub http_port: u16,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            with_elasticsearch_sink: false,
            elasticsearch_url: "http://localhost:9200".to_string(),
            data_stream_type: "logs".to_string(),
            data_stream_dataset: "console-example".to_string(),
            data_stream_namespace: "demo".to_string(),
            index: None,
            max_concurrency: 10,
            batch_size: 1000,
            batch_delay_ms: 5000,
            queue_capacity: 100_000,
            overflow_policy: OverflowPolicy::DropOldest,
            block_timeout_ms: 100,
            skip_bootstrap: false,
            bootstrap_failure: BootstrapFailurePolicy::Fail,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 60_000,
            username: None,
            password: None,
            api_key: None,
            request_timeout_secs: 30,
            enable_compression: false,
            shutdown_timeout_secs: 10,
            local_sink_path: None,
            local_sink_format: LocalFormat::Json,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            http_port: 8080,
            config_file: None,
        }
    }
}

/// Takes each field from `file` unless `cli` holds a non-default value for it.
macro_rules! merge_over_defaults {
    ($cli:ident, $file:ident, $defaults:ident; $($field:ident),+ $(,)?) => {
        $(
            if $cli.$field == $defaults.$field {
                $cli.$field = $file.$field;
            }
        )+
    };
}

impl Config {
    /// Parses CLI arguments (with environment fallbacks), then layers the
    /// optional config file underneath them.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)?;

        if let Some(path) = config.config_file.clone() {
            let file = Self::read_file(&path)?;
            config = config.merge_file(file);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    fn merge_file(mut self, file: Config) -> Self {
        let defaults = Config::default();
        merge_over_defaults!(self, file, defaults;
            with_elasticsearch_sink,
            elasticsearch_url,
            data_stream_type,
            data_stream_dataset,
            data_stream_namespace,
            index,
            max_concurrency,
            batch_size,
            batch_delay_ms,
            queue_capacity,
            overflow_policy,
            block_timeout_ms,
            skip_bootstrap,
            bootstrap_failure,
            max_retries,
            retry_base_delay_ms,
            retry_max_delay_ms,
            username,
            password,
            api_key,
            request_timeout_secs,
            enable_compression,
            shutdown_timeout_secs,
            local_sink_path,
            local_sink_format,
            log_level,
            log_format,
            http_port,
        );
        self
    }

    pub fn destination(&self) -> Destination {
        match &self.index {
            Some(index) => Destination::Index(index.clone()),
            None => Destination::DataStream {
                kind: self.data_stream_type.clone(),
                dataset: self.data_stream_dataset.clone(),
                namespace: self.data_stream_namespace.clone(),
            },
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(key) = &self.api_key {
            return Some(Credentials::ApiKey(key.clone()));
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn to_forwarder_config(&self) -> ForwarderConfig {
        let target = match &self.local_sink_path {
            Some(path) => LocalTarget::File(path.clone()),
            None => LocalTarget::Stdout,
        };

        ForwarderConfig {
            enabled: self.with_elasticsearch_sink,
            endpoint: self.elasticsearch_url.clone(),
            destination: self.destination(),
            max_concurrency: self.max_concurrency,
            max_batch_size: self.batch_size,
            max_batch_delay: Duration::from_millis(self.batch_delay_ms),
            queue_capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy,
            block_timeout: Duration::from_millis(self.block_timeout_ms),
            verify_destination: !self.skip_bootstrap,
            bootstrap_failure_policy: self.bootstrap_failure,
            retry: RetryConfig {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                strategy: RetryStrategy::ExponentialBackoff,
                jitter: true,
            },
            credentials: self.credentials(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            enable_compression: self.enable_compression,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            local_sink: LocalSinkConfig {
                target,
                format: self.local_sink_format,
            },
        }
    }
}
