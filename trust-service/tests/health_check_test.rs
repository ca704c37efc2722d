mod common;

use axum::http::StatusCode;
use common::{send, TestApp};

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::spawn().await;

    let (status, body) = send(&app.router(), "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "trust-service-test");
    assert_eq!(body["signing_key"], common::TEST_KID);
}
