use chrono::FixedOffset;
use inferlens::backend::{HttpMetricsSource, MetricsSource};
use inferlens::config::{BackendConfig, ViewsConfig};
use inferlens::handler::{self, AppState};
use inferlens::views::ViewRegistry;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_server(backend_url: &str) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let backend = BackendConfig {
        base_url: backend_url.to_string(),
        timeout_secs: 5,
        records_limit: 100,
        api_token: None,
    };
    let source: Arc<dyn MetricsSource> = Arc::new(HttpMetricsSource::new(&backend).unwrap());
    let state = Arc::new(AppState {
        registry: ViewRegistry::new(source, &ViewsConfig::default()),
        default_zone: FixedOffset::east_opt(0).unwrap(),
    });
    let app = handler::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server a moment to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, handle)
}

async fn mock_backend() -> MockServer {
    let server = MockServer::start().await;
    let bodies = [
        (
            "/metrics/summary",
            json!({
                "total_requests": { "value": 40 },
                "success_rate": { "value": 97.5 },
                "avg_latency": { "value": 310.0 }
            }),
        ),
        (
            "/metrics/timeseries",
            json!({
                "interval": "1h",
                "groups": [
                    { "model_name": "gpt-4o", "data_points": [
                        { "timestamp": "2024-01-01T10:00:00Z", "values": { "requests": 30, "avg_latency": 300 } }
                    ]},
                    { "model_name": "llama-3", "data_points": [
                        { "timestamp": "2024-01-01T11:00:00Z", "values": { "requests": 10, "avg_latency": 340 } }
                    ]}
                ]
            }),
        ),
        (
            "/metrics/top-entities",
            json!({ "groups": [
                { "model_name": "gpt-4o", "metrics": { "total_requests": { "value": 30 } } },
                { "model_name": "llama-3", "metrics": { "total_requests": { "value": 10 } } }
            ]}),
        ),
        (
            "/metrics/latency-distribution",
            json!({ "overall_distribution": [
                { "range": "0-100ms", "count": 0 },
                { "range": "100-500ms", "count": 40 }
            ]}),
        ),
        ("/inferences", json!({ "items": [] })),
    ];
    for (route, body) in bodies {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }
    server
}

async fn open_view(client: &reqwest::Client, addr: SocketAddr) -> String {
    let resp = client
        .post(format!("http://{addr}/v1/views"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["view_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let (addr, _handle) = spawn_server("http://127.0.0.1:9").await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_aggregate_inline_payload() {
    let (addr, _handle) = spawn_server("http://127.0.0.1:9").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/aggregate"))
        .json(&json!({
            "start": "2024-01-01T00:00:00Z",
            "end": "2024-01-02T00:00:00Z",
            "inputs": {
                "timeSeries": {
                    "interval": "1h",
                    "groups": [
                        { "model_name": "A", "data_points": [
                            { "timestamp": "2024-01-01T10:00:00Z", "values": { "total_tokens": 100 } }
                        ]}
                    ]
                }
            }
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let stats: Value = resp.json().await.unwrap();
    assert_eq!(stats["groupBy"], "model");
    assert_eq!(stats["tokensSeries"], json!([{ "time": "10:00", "value": 100.0 }]));
    assert_eq!(
        stats["groupedTokensSeries"]["A"],
        json!([{ "time": "10:00", "value": 100.0 }])
    );
    assert_eq!(stats["totalRequests"], 0.0);
    assert_eq!(stats["failureRate"], 100.0);
    assert_eq!(stats["hourlyDistribution"].as_array().unwrap().len(), 24);
    assert_eq!(stats["topModels"], json!([]));
}

#[tokio::test]
async fn test_aggregate_applies_display_offset() {
    let (addr, _handle) = spawn_server("http://127.0.0.1:9").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/aggregate"))
        .json(&json!({
            "start": "2024-01-01T00:00:00Z",
            "end": "2024-01-02T00:00:00Z",
            "tz_offset_minutes": 120,
            "group_by": "endpoint",
            "inputs": {
                "records": [
                    { "inference_id": "1", "endpoint_name": "ep-a", "timestamp": "2024-01-01T10:15:00Z",
                      "response_time_ms": 250, "is_success": true, "input_tokens": 5, "output_tokens": 7 },
                    { "inference_id": "2", "endpoint_name": "ep-b", "timestamp": "2024-01-01T10:45:00Z",
                      "response_time_ms": 2500, "is_success": false }
                ]
            }
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let stats: Value = resp.json().await.unwrap();
    assert_eq!(stats["groupBy"], "deployment");
    assert_eq!(stats["totalRequests"], 2.0);
    assert_eq!(stats["successRate"], 50.0);
    assert_eq!(stats["hourlyDistribution"][12]["count"], 2.0);
    let endpoints: Vec<&str> = stats["topEndpoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(endpoints, vec!["ep-a", "ep-b"]);
    assert!(stats["groupedLatencyDistribution"]["ep-b"].is_array());
}

#[tokio::test]
async fn test_aggregate_rejects_bad_requests() {
    let (addr, _handle) = spawn_server("http://127.0.0.1:9").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/aggregate"))
        .json(&json!({
            "start": "2024-01-02T00:00:00Z",
            "end": "2024-01-01T00:00:00Z"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("end"));

    let resp = client
        .post(format!("http://{addr}/v1/aggregate"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_view_lifecycle() {
    let backend = mock_backend().await;
    let (addr, _handle) = spawn_server(&backend.uri()).await;
    let client = reqwest::Client::new();

    let view_id = open_view(&client, addr).await;

    let resp = client
        .get(format!("http://{addr}/v1/views/{view_id}/stats"))
        .query(&[
            ("start", "2024-01-01T00:00:00Z"),
            ("end", "2024-01-01T12:00:00Z"),
            ("group_by", "model"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let snapshot: Value = resp.json().await.unwrap();
    assert_eq!(snapshot["view_id"], view_id.as_str());
    assert_eq!(snapshot["status"], "fresh");

    let stats = &snapshot["stats"];
    assert_eq!(stats["totalRequests"], 40.0);
    assert_eq!(stats["topModels"][0]["name"], "gpt-4o");
    assert_eq!(stats["topModels"][0]["percentage"], 75.0);
    assert_eq!(stats["latencyDistribution"][1]["percentage"], 100.0);

    // both groups share one category axis
    let grouped = &stats["groupedLatencySeries"];
    assert_eq!(grouped["gpt-4o"].as_array().unwrap().len(), 2);
    assert_eq!(grouped["llama-3"][0], json!({ "time": "10:00", "value": 0.0 }));

    let colors = snapshot["colors"].as_object().unwrap();
    assert_eq!(colors.len(), 2);
    assert_ne!(colors["gpt-4o"], colors["llama-3"]);

    let resp = client
        .delete(format!("http://{addr}/v1/views/{view_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["closed"], view_id.as_str());

    let resp = client
        .delete(format!("http://{addr}/v1/views/{view_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(format!("http://{addr}/v1/views/{view_id}/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_view_colors_stay_stable_across_refreshes() {
    let backend = mock_backend().await;
    let (addr, _handle) = spawn_server(&backend.uri()).await;
    let client = reqwest::Client::new();
    let view_id = open_view(&client, addr).await;
    let url = format!("http://{addr}/v1/views/{view_id}/stats");

    let first: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    let second: Value = client
        .get(&url)
        .query(&[("hours", "6")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["colors"], second["colors"]);
}

#[tokio::test]
async fn test_backend_failure_reports_no_data() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&backend)
        .await;
    let (addr, _handle) = spawn_server(&backend.uri()).await;
    let client = reqwest::Client::new();
    let view_id = open_view(&client, addr).await;

    let resp = client
        .get(format!("http://{addr}/v1/views/{view_id}/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let snapshot: Value = resp.json().await.unwrap();
    assert_eq!(snapshot["status"], "no_data");
    assert!(snapshot.get("stats").is_none());
}

#[tokio::test]
async fn test_view_stats_validates_params() {
    let backend = mock_backend().await;
    let (addr, _handle) = spawn_server(&backend.uri()).await;
    let client = reqwest::Client::new();
    let view_id = open_view(&client, addr).await;

    let resp = client
        .get(format!("http://{addr}/v1/views/{view_id}/stats"))
        .query(&[("tz_offset_minutes", "2000")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("http://{addr}/v1/views/{view_id}/stats"))
        .query(&[("start", "not-a-date")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
