use super::{Config, ConfigError};
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.elasticsearch_url).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid Elasticsearch URL '{}': {}",
                self.elasticsearch_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Elasticsearch URL must use http or https: {}",
                self.elasticsearch_url
            )));
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max concurrency must be at least 1".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.batch_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch delay must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity < self.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Queue capacity ({}) must be at least as large as batch size ({})",
                self.queue_capacity, self.batch_size
            )));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry base delay ({}ms) exceeds retry max delay ({}ms)",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(index) = &self.index
            && (index.is_empty() || index.chars().any(char::is_uppercase))
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Index name must be non-empty and lowercase: '{index}'"
            )));
        }

        if self.index.is_none()
            && [
                &self.data_stream_type,
                &self.data_stream_dataset,
                &self.data_stream_namespace,
            ]
            .iter()
            .any(|part| part.is_empty())
        {
            return Err(ConfigError::InvalidConfig(
                "Data stream type, dataset and namespace must all be set".to_string(),
            ));
        }

        if self
            .api_key
            .as_deref()
            .is_some_and(|key| key.is_empty() || !key.bytes().all(|b| b.is_ascii_graphic()))
        {
            return Err(ConfigError::InvalidConfig(
                "API key must be a non-empty printable ASCII string".to_string(),
            ));
        }

        match (&self.username, &self.password, &self.api_key) {
            (Some(_), None, _) | (None, Some(_), _) => Err(ConfigError::InvalidConfig(
                "Username and password must be provided together".to_string(),
            )),
            (Some(_), Some(_), Some(_)) => Err(ConfigError::InvalidConfig(
                "Use either basic credentials or an API key, not both".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
