mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{send, TestApp, TEST_KID};
use tower::util::ServiceExt;

#[tokio::test]
async fn test_jwks_endpoint() {
    let app = TestApp::spawn().await;

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/.well-known/jwks.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=3600"
    );

    let (status, body) = send(&app.router(), "GET", "/.well-known/jwks.json", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], TEST_KID);
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");
    assert!(keys[0]["n"].as_str().is_some_and(|n| !n.is_empty()));
    assert_eq!(keys[0]["e"], "AQAB");
}

#[tokio::test]
async fn test_published_key_verifies_issued_tokens() {
    let app = TestApp::spawn().await;
    app.enroll("alice@example.com").await;
    let login = app.login("alice@example.com").await;

    let (_, body) = send(&app.router(), "GET", "/.well-known/jwks.json", None, None).await;
    let set: jsonwebtoken::jwk::JwkSet = serde_json::from_value(body).unwrap();
    let jwk = set.find(TEST_KID).unwrap();
    let key = jsonwebtoken::DecodingKey::from_jwk(jwk).unwrap();

    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
    validation.set_issuer(&[common::TEST_ISSUER]);
    validation.set_audience(&[common::SELF_APP_ID]);
    let data = jsonwebtoken::decode::<serde_json::Value>(
        &login.issued.signed.access_token,
        &key,
        &validation,
    )
    .unwrap();

    assert_eq!(data.claims["sub"], login.session.user_id);
    assert_eq!(data.claims["level"], 1);
    assert_eq!(data.claims["perm"], serde_json::json!(["/*", "/*/**"]));
}
