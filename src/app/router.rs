use super::handler::diagnostics::elasticsearch_url;
use super::handler::health::health_handler;
use super::handler::weather::weather_forecast;
use super::handler::work::work;
use super::middleware::request_logging;
use super::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;

/// Method and path of every route `build_router` registers, in the order
/// they are announced at startup.
pub fn route_listing(forwarding_enabled: bool) -> Vec<&'static str> {
    let mut routes = vec!["GET  /weatherforecast", "ANY  /work", "GET  /v1/health"];
    if forwarding_enabled {
        routes.push("GET  /elasticSearchUrl");
    }
    if cfg!(feature = "metrics") {
        routes.push("GET  /metrics");
    }
    routes
}

/// Builds the demo API. `/elasticSearchUrl` only exists when remote
/// forwarding is enabled.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/weatherforecast", get(weather_forecast))
        .route("/work", get(work).post(work).put(work).delete(work))
        .route("/v1/health", get(health_handler));

    if state.forwarder.is_enabled() {
        router = router.route("/elasticSearchUrl", get(elasticsearch_url));
    }

    #[cfg(feature = "metrics")]
    {
        router = router.route("/metrics", get(super::handler::diagnostics::metrics));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), request_logging))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_listing_follows_forwarding() {
        let local_only = route_listing(false);
        assert!(local_only.contains(&"GET  /v1/health"));
        assert!(!local_only.contains(&"GET  /elasticSearchUrl"));

        let forwarding = route_listing(true);
        assert!(forwarding.contains(&"GET  /elasticSearchUrl"));
        assert_eq!(forwarding.len(), local_only.len() + 1);
        assert_eq!(
            forwarding.contains(&"GET  /metrics"),
            cfg!(feature = "metrics")
        );
    }
}
