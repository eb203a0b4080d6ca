//! End-to-end tests for the exporter over real sockets

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url_exporter::{Config, ExporterServer};

/// Helper to accept and drop raw TCP connections
async fn spawn_tcp() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });
    port
}

/// Helper to build a config that checks once and never retries
fn test_config(targets: Vec<String>) -> Config {
    Config {
        targets,
        check_interval: Duration::from_secs(3600),
        timeout: Duration::from_secs(1),
        retries: 0,
        instance_id: "it".to_string(),
        ..Config::default()
    }
}

/// Helper to scrape until `predicate` holds
async fn scrape_until(base: &str, predicate: impl Fn(&str) -> bool) -> String {
    let client = reqwest::Client::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(response) = client.get(format!("{}/metrics", base)).send().await {
                let body = response.text().await.unwrap_or_default();
                if predicate(&body) {
                    return body;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Timeout waiting for metrics")
}

#[tokio::test]
async fn test_exporter_serves_check_results() {
    let ftp_port = spawn_tcp().await;
    let ftp_target = format!("ftp://127.0.0.1:{}", ftp_port);
    let gopher_target = "gopher://127.0.0.1".to_string();

    let server =
        ExporterServer::new(test_config(vec![ftp_target.clone(), gopher_target.clone()])).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async {
        let _ = stop_rx.await;
    }));

    let body = scrape_until(&base, |body| {
        body.contains("url_up{url=\"ftp://") && body.contains("url_error{url=\"gopher://")
    })
    .await;

    // Raw connect counts as 200 without speaking FTP
    assert!(body.contains(&format!(
        r#"url_up{{url="{0}",host="{0}",path="/",instance="it"}} 1"#,
        ftp_target
    )));
    assert!(body.contains(&format!(
        r#"url_http_status_code{{url="{0}",host="{0}",path="/",instance="it"}} 200"#,
        ftp_target
    )));
    assert!(body.contains(&format!(
        r#"url_check_total{{url="{0}",host="{0}",path="/",status_code="200",instance="it"}} 1"#,
        ftp_target
    )));

    // Unknown scheme is a terminal error, not silently skipped
    assert!(body.contains(
        r#"url_error{url="gopher://127.0.0.1",host="gopher://127.0.0.1",path="/",instance="it"} 1"#
    ));
    assert!(body.contains(
        r#"url_status_code_total{url="gopher://127.0.0.1",host="gopher://127.0.0.1",path="/",status_code="error",instance="it"} 1"#
    ));
    assert!(!body.contains(r#"url_response_time_milliseconds{url="gopher://"#));

    let client = reqwest::Client::new();
    let info = client
        .get(format!("{}/", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let info: serde_json::Value = serde_json::from_str(&info).unwrap();
    assert_eq!(info["service"], "url-exporter");
    assert_eq!(info["targets"], 2);
    assert_eq!(info["instance"], "it");

    let health = client.get(format!("{}/health", base)).send().await.unwrap();
    assert!(health.status().is_success());

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("server stops after shutdown signal")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_exporter_reports_unreachable_target() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);
    let target = format!("redis://127.0.0.1:{}", port);

    let server = ExporterServer::new(test_config(vec![target.clone()])).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async {
        let _ = stop_rx.await;
    }));

    let body = scrape_until(&base, |body| body.contains("url_up{")).await;
    assert!(body.contains(&format!(
        r#"url_up{{url="{0}",host="{0}",path="/",instance="it"}} 0"#,
        target
    )));
    assert!(body.contains(&format!(
        r#"url_error{{url="{0}",host="{0}",path="/",instance="it"}} 1"#,
        target
    )));

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
