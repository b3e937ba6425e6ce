use super::*;
use crate::Config;
use crate::error::ApiError;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

mod orders;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        data_dir: dir.path().join("data"),
        ..Config::default()
    };
    config.api.public_url = "http://files.test".to_string();
    config.lock.poll_interval_ms = 10;
    config.network.retry.max_attempts = 0;
    config
}

fn test_service(config: Config) -> OrderService {
    OrderService::new(config).unwrap()
}

/// Router over a fresh data directory, without an API key
fn test_app() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(test_service(test_config(&dir)));
    (dir, app)
}

/// Create an order directory the way `OrderStore::create` lays it out
fn seed_order(data_dir: &Path, tenant_id: &str, order_number: &str, chunks: &[(&str, &[u8])]) {
    let root = data_dir.join(tenant_id).join(order_number);
    std::fs::create_dir_all(root.join("cache")).unwrap();
    std::fs::create_dir_all(root.join("logs")).unwrap();
    for (name, bytes) in chunks {
        std::fs::write(root.join(name), bytes).unwrap();
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn error_code(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    error.error.code
}

#[tokio::test]
async fn health_reports_version() {
    let (_dir, app) = test_app();

    let response = send(&app, "GET", "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (_dir, app) = test_app();

    let response = send(&app, "GET", "/api/openapi.json", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["paths"]["/api/download/{token}"].is_object());
}

#[tokio::test]
async fn cors_headers_present_when_enabled() {
    let (_dir, app) = test_app();

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn cors_headers_absent_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.api.cors_enabled = false;
    let app = create_router(test_service(config));

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn api_key_guards_management_routes_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.api.api_key = Some("s3cret".to_string());
    let data_dir = config.data_dir.clone();
    let app = create_router(test_service(config));
    seed_order(&data_dir, "acme", "1042", &[]);

    let response = send(&app, "GET", "/api/download/acme/1042", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/download/acme/1042")
        .header("X-Api-Key", "s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health and token downloads stay public; a bad token is a token error, not a key error
    let response = send(&app, "GET", "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "GET", "/api/download/not-a-token", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "invalid_token");
}

#[tokio::test]
async fn server_binds_and_shuts_down_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let service = test_service(config);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(start_api_server(service, async move {
        stop_rx.await.ok();
    }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
