use axum::http::StatusCode;

/// Load-testing stub: fails half of the time.
pub async fn work() -> StatusCode {
    if rand::random_bool(0.5) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}
