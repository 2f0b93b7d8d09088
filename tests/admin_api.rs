//! Dashboard API served over a real listener.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{dependency, http_client, start_programmable_backend};
use resilience_monitor::admin::{self, setup_admin_router};
use resilience_monitor::config::MonitorConfig;
use resilience_monitor::{Monitor, Shutdown};
use serde_json::Value;
use tokio::net::TcpListener;

async fn failing_fleet() -> Monitor {
    let ok = start_programmable_backend(|_| async { (200, "ok".to_string()) }).await;
    let down = start_programmable_backend(|_| async { (500, "down".to_string()) }).await;

    let config = MonitorConfig {
        dependencies: vec![
            dependency("search", format!("http://{}/health", ok)),
            dependency("billing", format!("http://{}/health", down)),
        ],
        ..Default::default()
    };
    let monitor = Monitor::build(config).unwrap();
    for _ in 0..2 {
        monitor.probes().probe_all().await;
    }
    monitor.dashboard().refresh();
    monitor
}

async fn serve_admin(monitor: &Monitor, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = setup_admin_router(monitor.admin_state(), Duration::from_secs(5));
    tokio::spawn(admin::serve(listener, router, shutdown.subscribe()));
    addr
}

#[tokio::test]
async fn test_status_and_dashboard_reflect_probes() {
    let monitor = failing_fleet().await;
    let shutdown = Shutdown::new();
    let addr = serve_admin(&monitor, &shutdown).await;
    let client = http_client();

    let status: Value = client
        .get(format!("http://{}/status", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["breakers"], 2);
    assert_eq!(status["status"], "degraded");
    assert_eq!(status["system_health_score"], 50.0);

    let dashboard: Value = client
        .get(format!("http://{}/dashboard", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dashboard["critical_breakers"], 1);
    assert_eq!(dashboard["error_summaries"][0]["error_code"], "OPERATION_FAILED");
    assert_eq!(dashboard["error_summaries"][0]["count"], 2);

    let alerts: Value = client
        .get(format!("http://{}/alerts", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["critical"].as_array().unwrap().len(), 1);
    assert!(alerts["critical"][0].as_str().unwrap().starts_with("billing: circuit OPEN"));

    let query: Value = client
        .get(format!("http://{}/dashboard/query", addr))
        .query(&[("breaker_name", "search")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(query["breakers"].as_array().unwrap().len(), 1);
    assert!(query["error_summaries"].as_array().unwrap().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn test_requests_continue_caller_trace() {
    let monitor = failing_fleet().await;
    let shutdown = Shutdown::new();
    let addr = serve_admin(&monitor, &shutdown).await;
    let client = http_client();

    let response = client
        .get(format!("http://{}/errors", addr))
        .header("X-Correlation-ID", "corr-1")
        .header("X-Trace-ID", "trace-1")
        .header("X-Span-ID", "span-1")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let headers = response.headers();
    assert_eq!(headers["x-correlation-id"], "corr-1");
    assert_eq!(headers["x-trace-id"], "trace-1");
    assert_eq!(headers["x-parent-span-id"], "span-1");
    let server_span = headers["x-span-id"].to_str().unwrap().to_string();
    assert_ne!(server_span, "span-1");

    let exported: Value = client
        .get(format!("http://{}/traces/export", addr))
        .query(&[("trace_id", "trace-1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let spans = exported.as_array().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0]["spanID"], server_span.as_str());
    assert_eq!(spans[0]["parentSpanID"], "span-1");
    assert_eq!(spans[0]["operationName"], "GET /errors");
    assert!(monitor.contexts().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn test_monitor_serves_until_shutdown() {
    let monitor = Monitor::build(MonitorConfig::default()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(monitor.serve(Some(listener), shutdown.clone()));

    let client = http_client();
    let mut status = None;
    for _ in 0..20 {
        if let Ok(response) = client.get(format!("http://{}/status", addr)).send().await {
            status = Some(response.status());
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(status.map(|s| s.as_u16()), Some(200));

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}
