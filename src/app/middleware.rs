use super::state::AppState;
use crate::domain::{LogEvent, Severity};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;

pub const REQUEST_TEMPLATE: &str =
    "HTTP {RequestMethod} {RequestPath} responded {StatusCode} in {Elapsed} ms";

/// Emits one event per handled request: Error for 5xx, Information otherwise.
pub async fn request_logging(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = (started.elapsed().as_secs_f64() * 1_000.0 * 10_000.0).round() / 10_000.0;
    let level = if status.is_server_error() {
        Severity::Error
    } else {
        Severity::Information
    };

    state.forwarder.enqueue(
        LogEvent::new(level, REQUEST_TEMPLATE)
            .with_property("RequestMethod", method)
            .with_property("RequestPath", path)
            .with_property("StatusCode", status.as_u16())
            .with_property("Elapsed", elapsed_ms),
    );

    response
}
