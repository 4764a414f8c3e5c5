use axum_test::TestServer;
use elk_forwarder::app::handler::weather::{SUMMARIES, WeatherForecast};
use elk_forwarder::app::router::{build_router, route_listing};
use elk_forwarder::app::state::AppState;
use elk_forwarder::forwarder::{ForwarderConfig, LocalFormat, LocalSink, LogForwarder};
use elk_forwarder::test_support::{MemoryWriter, MockExporter};
use serde_json::Value;
use std::sync::Arc;

fn local_forwarder(writer: &MemoryWriter) -> LogForwarder {
    LogForwarder::with_exporter(
        ForwarderConfig::default(),
        Arc::new(MockExporter::new()),
        LocalSink::from_writer(writer.clone(), LocalFormat::Json),
    )
    .unwrap()
}

fn create_test_server(forwarder: LogForwarder) -> TestServer {
    let state = AppState::new(forwarder).unwrap();
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn test_health_endpoint_returns_healthy() {
    let server = create_test_server(local_forwarder(&MemoryWriter::new()));

    let response = server.get("/v1/health").await;

    response.assert_status_ok();
    response.assert_text("Healthy");
}

#[tokio::test]
async fn test_weather_forecast_returns_five_days() {
    let server = create_test_server(local_forwarder(&MemoryWriter::new()));

    let response = server.get("/weatherforecast").await;
    response.assert_status_ok();

    let raw: Vec<Value> = response.json();
    assert_eq!(raw.len(), 5);
    assert!(raw[0].get("temperatureC").is_some());
    assert!(raw[0].get("temperatureF").is_some());

    let forecast: Vec<WeatherForecast> = response.json();
    for pair in forecast.windows(2) {
        assert!(pair[0].date < pair[1].date);
    }
    for day in &forecast {
        assert!((-20..55).contains(&day.temperature_c));
        assert!(SUMMARIES.contains(&day.summary.as_str()));
    }
}

#[tokio::test]
async fn test_work_returns_ok_or_server_error() {
    let server = create_test_server(local_forwarder(&MemoryWriter::new()));

    for _ in 0..20 {
        let status = server.get("/work").await.status_code().as_u16();
        assert!(status == 200 || status == 500, "unexpected status {status}");
    }
    let status = server.delete("/work").await.status_code().as_u16();
    assert!(status == 200 || status == 500);
}

#[tokio::test]
async fn test_elasticsearch_url_hidden_when_disabled() {
    let server = create_test_server(local_forwarder(&MemoryWriter::new()));

    server.get("/elasticSearchUrl").await.assert_status_not_found();
}

#[tokio::test]
async fn test_elasticsearch_url_reports_endpoint() {
    let forwarder = LogForwarder::with_exporter(
        ForwarderConfig {
            enabled: true,
            endpoint: "http://elastic.internal:9200".to_string(),
            ..ForwarderConfig::default()
        },
        Arc::new(MockExporter::new()),
        LocalSink::from_writer(MemoryWriter::new(), LocalFormat::Json),
    )
    .unwrap();
    let server = create_test_server(forwarder);

    let response = server.get("/elasticSearchUrl").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["url"], "http://elastic.internal:9200");
    assert_eq!(body["destination"], "logs-console-example-demo");
}

#[tokio::test]
async fn test_announced_routes_are_served() {
    let forwarder = LogForwarder::with_exporter(
        ForwarderConfig {
            enabled: true,
            ..ForwarderConfig::default()
        },
        Arc::new(MockExporter::new()),
        LocalSink::from_writer(MemoryWriter::new(), LocalFormat::Json),
    )
    .unwrap();
    let server = create_test_server(forwarder);

    for route in route_listing(true) {
        let path = route.split_whitespace().last().unwrap();
        let status = server.get(path).await.status_code();
        assert_ne!(status, axum::http::StatusCode::NOT_FOUND, "{route} is not served");
    }
}

#[tokio::test]
async fn test_requests_are_logged() {
    let writer = MemoryWriter::new();
    let server = create_test_server(local_forwarder(&writer));

    server.get("/v1/health").await.assert_status_ok();
    server
        .post("/v1/health")
        .await
        .assert_status(axum::http::StatusCode::METHOD_NOT_ALLOWED);

    let lines = writer.json_lines();
    assert_eq!(lines.len(), 2);

    assert_eq!(lines[0]["level"], "Information");
    assert_eq!(
        lines[0]["message_template"],
        "HTTP {RequestMethod} {RequestPath} responded {StatusCode} in {Elapsed} ms"
    );
    assert_eq!(lines[0]["properties"]["RequestMethod"], "GET");
    assert_eq!(lines[0]["properties"]["RequestPath"], "/v1/health");
    assert_eq!(lines[0]["properties"]["StatusCode"], 200);
    assert!(lines[0]["properties"]["Elapsed"].is_number());
    assert!(
        lines[0]["message"]
            .as_str()
            .unwrap()
            .starts_with("HTTP GET /v1/health responded 200 in ")
    );

    assert_eq!(lines[1]["properties"]["RequestMethod"], "POST");
    assert_eq!(lines[1]["properties"]["StatusCode"], 405);
    assert_eq!(lines[1]["level"], "Information");
}

#[tokio::test]
async fn test_failed_work_is_logged_as_error() {
    let writer = MemoryWriter::new();
    let server = create_test_server(local_forwarder(&writer));

    let mut saw_failure = false;
    for _ in 0..64 {
        let status = server.get("/work").await.status_code().as_u16();
        let line = writer.json_lines().pop().unwrap();
        if status == 500 {
            assert_eq!(line["level"], "Error");
            saw_failure = true;
            break;
        }
        assert_eq!(line["level"], "Information");
    }
    assert!(saw_failure, "no 500 in 64 tries");
}

#[cfg(feature = "metrics")]
#[tokio::test]
async fn test_metrics_endpoint_renders_counters() {
    let writer = MemoryWriter::new();
    let server = create_test_server(local_forwarder(&writer));

    server.get("/v1/health").await.assert_status_ok();
    let response = server.get("/metrics").await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("elk_forwarder_events_written_locally 1"));
}
