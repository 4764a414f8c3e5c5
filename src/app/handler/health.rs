use tracing::debug;

pub async fn health_handler() -> &'static str {
    debug!("Health check requested");
    "Healthy"
}
