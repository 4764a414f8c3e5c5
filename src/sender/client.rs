use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Request timeout: {0}")]
    RequestTimeout(String),
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Credentials passed through to the search backend unchanged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    Basic { username: String, password: String },
    /// Sent as `Authorization: ApiKey <value>`; the value is expected to be
    /// the already base64-encoded `id:api_key` pair.
    ApiKey(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}

/// Where bulk writes land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Elasticsearch data stream named `{kind}-{dataset}-{namespace}`.
    DataStream {
        kind: String,
        dataset: String,
        namespace: String,
    },
    Index(String),
}

impl Default for Destination {
    fn default() -> Self {
        Destination::DataStream {
            kind: "logs".to_string(),
            dataset: "console-example".to_string(),
            namespace: "demo".to_string(),
        }
    }
}

impl Destination {
    pub fn name(&self) -> String {
        match self {
            Destination::DataStream {
                kind,
                dataset,
                namespace,
            } => format!("{kind}-{dataset}-{namespace}"),
            Destination::Index(name) => name.clone(),
        }
    }

    /// Bulk action for each document. Data streams only accept `create`.
    pub fn bulk_action(&self) -> &'static str {
        match self {
            Destination::DataStream { .. } => "create",
            Destination::Index(_) => "index",
        }
    }

    fn bootstrap_path(&self) -> String {
        match self {
            Destination::DataStream { .. } => format!("_data_stream/{}", self.name()),
            Destination::Index(name) => name.clone(),
        }
    }

    fn existence_method(&self) -> Method {
        match self {
            Destination::DataStream { .. } => Method::GET,
            Destination::Index(_) => Method::HEAD,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
    pub credentials: Option<Credentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9200".to_string(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 10,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("elk-forwarder/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: false,
            credentials: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
    endpoint_url: Url,
    api_key_header: Option<HeaderValue>,
    stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint_url: Url = config.endpoint.parse().map_err(|e| {
            ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        if endpoint_url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfiguration(format!(
                "Endpoint URL cannot be used as a base: {endpoint_url}"
            )));
        }

        let api_key_header = match &config.credentials {
            Some(Credentials::ApiKey(key)) => Some(api_key_header(key)?),
            _ => None,
        };

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            endpoint_url,
            api_key_header,
            stats: Arc::new(ClientStats::default()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Resolves `path` below the endpoint, keeping any path prefix the
    /// endpoint already has (e.g. a reverse proxy mount point).
    pub fn url_for(&self, path: &str) -> Url {
        let mut url = self.endpoint_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        url
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.credentials {
            Some(Credentials::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(Credentials::ApiKey(_)) => match &self.api_key_header {
                Some(value) => builder.header(AUTHORIZATION, value.clone()),
                None => builder,
            },
            None => builder,
        }
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Checks that `destination` exists and creates it when it does not.
    pub async fn verify_destination(&self, destination: &Destination) -> Result<(), ClientError> {
        let url = self.url_for(&destination.bootstrap_path());
        let start = Instant::now();

        let response = self
            .request(destination.existence_method(), url.clone())
            .send()
            .await
            .map_err(map_send_error)?;
        self.stats
            .record_request(response.status().is_success(), start.elapsed());

        match response.status() {
            status if status.is_success() => {
                debug!("Destination {} exists", destination);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!("Destination {} not found, creating it", destination);
                let start = Instant::now();
                let response = self
                    .request(Method::PUT, url)
                    .send()
                    .await
                    .map_err(map_send_error)?;
                let status = response.status();
                self.stats.record_request(status.is_success(), start.elapsed());

                if status.is_success() {
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(ClientError::HttpError {
                        status: status.as_u16(),
                        message: format!("Failed to create {destination}: {body}"),
                    })
                }
            }
            status => Err(ClientError::HttpError {
                status: status.as_u16(),
                message: format!("Unexpected response checking {destination}"),
            }),
        }
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            average_response_time,
        }
    }
}

fn map_send_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::RequestTimeout(e.to_string())
    } else {
        ClientError::NetworkError(e)
    }
}

fn api_key_header(key: &str) -> Result<HeaderValue, ClientError> {
    let mut value = HeaderValue::from_str(&format!("ApiKey {key}")).map_err(|_| {
        ClientError::InvalidConfiguration(
            "API key contains characters not allowed in an HTTP header".to_string(),
        )
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> HttpClient {
        HttpClient::new(ClientConfig {
            endpoint: endpoint.to_string(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_for_keeps_prefix() {
        assert_eq!(
            client("http://es:9200").url_for("logs-a-b/_bulk").as_str(),
            "http://es:9200/logs-a-b/_bulk"
        );
        assert_eq!(
            client("https://proxy.local/es/").url_for("/_data_stream/x").as_str(),
            "https://proxy.local/es/_data_stream/x"
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = HttpClient::new(ClientConfig {
            endpoint: "not a url".to_string(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_destination_names() {
        let stream = Destination::default();
        assert_eq!(stream.name(), "logs-console-example-demo");
        assert_eq!(stream.bulk_action(), "create");
        assert_eq!(stream.bootstrap_path(), "_data_stream/logs-console-example-demo");

        let index = Destination::Index("app-logs".to_string());
        assert_eq!(index.bulk_action(), "index");
        assert_eq!(index.bootstrap_path(), "app-logs");
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let basic = Credentials::Basic {
            username: "elastic".to_string(),
            password: "changeme".to_string(),
        };
        let printed = format!("{basic:?} {:?}", Credentials::ApiKey("c2VjcmV0".to_string()));
        assert!(printed.contains("elastic"));
        assert!(!printed.contains("changeme"));
        assert!(!printed.contains("c2VjcmV0"));
    }

    #[test]
    fn test_unencodable_api_key_rejected() {
        let result = HttpClient::new(ClientConfig {
            credentials: Some(Credentials::ApiKey("c2Vj\ncmV0".to_string())),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));

        let client = HttpClient::new(ClientConfig {
            credentials: Some(Credentials::ApiKey("c2VjcmV0".to_string())),
            ..ClientConfig::default()
        })
        .unwrap();
        let request = client
            .request(Method::POST, client.url_for("_bulk"))
            .build()
            .unwrap();
        let header = request.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(header, "ApiKey c2VjcmV0");
        assert!(header.is_sensitive());
    }
}
