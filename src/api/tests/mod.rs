use super::*;
use crate::downloader::test_helpers::{self, mount_item};
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;


/// Helper to create a test BunkrDownloader wrapped in Arc, with its router
async fn create_test_app(server: &MockServer) -> (Router, Arc<BunkrDownloader>, tempfile::TempDir) {
    let (downloader, temp_dir) = test_helpers::create_test_downloader(server).await;
    let downloader = Arc::new(downloader);
    let config = Arc::new(downloader.config().clone());
    let app = create_router(downloader.clone(), config);
    (app, downloader, temp_dir)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let server = MockServer::start().await;
    let (downloader, _temp_dir) = test_helpers::create_test_downloader(&server).await;

    let mut config = downloader.config().clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);
    let downloader = Arc::new(downloader);

    let api_handle = tokio::spawn(async move { start_api_server(downloader, config).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be serving");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let server = MockServer::start().await;
    let (app, _downloader, _temp_dir) = create_test_app(&server).await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let server = MockServer::start().await;
    let (downloader, _temp_dir) = test_helpers::create_test_downloader(&server).await;

    let mut config = downloader.config().clone();
    config.api.cors_enabled = false;
    let app = create_router(Arc::new(downloader), Arc::new(config));

    let request = Request::builder()
        .uri("/health")
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
async fn test_swagger_ui_can_be_disabled() {
    let server = MockServer::start().await;
    let (downloader, _temp_dir) = test_helpers::create_test_downloader(&server).await;

    let mut config = downloader.config().clone();
    config.api.swagger_ui = false;
    let app = create_router(Arc::new(downloader), Arc::new(config));

    let response = app.oneshot(get("/swagger-ui/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
