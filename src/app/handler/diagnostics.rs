use crate::app::state::AppState;
use axum::Json;
use axum::extract::State;
#[cfg(feature = "metrics")]
use axum::http::{StatusCode, header};
#[cfg(feature = "metrics")]
use axum::response::IntoResponse;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchInfo {
    pub url: Option<String>,
    pub destination: Option<String>,
}

pub async fn elasticsearch_url(State(state): State<AppState>) -> Json<ElasticsearchInfo> {
    Json(ElasticsearchInfo {
        url: state.forwarder.endpoint().map(str::to_string),
        destination: state.forwarder.destination().map(|d| d.name()),
    })
}

#[cfg(feature = "metrics")]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.prometheus.render(&state.forwarder.metrics()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
