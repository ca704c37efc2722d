mod common;

use axum::http::StatusCode;
use common::{level, send, TestApp};
use serde_json::json;
use trust_service::store::Store;

#[tokio::test]
async fn test_missing_bearer_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, body) = send(
        &app.router(),
        "POST",
        "/session/downgrade",
        None,
        Some(json!({ "level": 0 })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_token");
}

#[tokio::test]
async fn test_garbage_bearer_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, body) = send(
        &app.router(),
        "POST",
        "/session/logout",
        Some("not.a.jwt"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_terminated_session_is_rejected() {
    let app = TestApp::spawn().await;
    app.enroll("alice@example.com").await;
    let login = app.login("alice@example.com").await;
    let bearer = login.issued.signed.access_token.as_str();

    let (status, body) = send(&app.router(), "POST", "/session/logout", Some(bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["terminated_tokens"], 2);
    assert_eq!(body["session_id"], login.session.id);

    let (status, body) = send(&app.router(), "POST", "/session/logout", Some(bearer), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_terminated");
}

#[tokio::test]
async fn test_third_party_token_cannot_manage_the_session() {
    let app = TestApp::spawn().await;
    app.seed_app("notes", 2, None).await;
    app.enroll("judy@example.com").await;
    let login = app.login("judy@example.com").await;
    let password_id = login.login.credential_id.clone();
    app.install(&login.session.user_id, "notes", &["notes/documents/*"])
        .await;

    let derived = app
        .state
        .sessions
        .derive(&login.issued.token, Some("notes"), "notes", level(1), false)
        .await
        .unwrap();
    assert_eq!(derived.signed.audience, "notes");
    let bearer = derived.signed.access_token.as_str();

    let (status, body) = send(
        &app.router(),
        "POST",
        "/credentials/bind",
        Some(bearer),
        Some(json!({
            "credential_type": "totp",
            "payload": { "code": "111222", "level": 1 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");

    let (status, _) = send(
        &app.router(),
        "POST",
        "/credentials/unbind",
        Some(bearer),
        Some(json!({ "credential_id": password_id, "mode": "disable" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router(), "POST", "/session/logout", Some(bearer), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let session = app.store.find_session(&login.session.id).await.unwrap().unwrap();
    assert!(!session.terminated);
    let credentials = app
        .store
        .find_user_credentials(&login.session.user_id)
        .await
        .unwrap();
    assert_eq!(credentials.len(), 1);
    assert!(!credentials[0].disabled);
}

#[tokio::test]
async fn test_route_outside_token_scope_is_forbidden() {
    let app = TestApp::spawn().await;
    app.seed_app("notes", 2, None).await;
    app.enroll("ken@example.com").await;
    let login = app.login("ken@example.com").await;
    app.install(&login.session.user_id, "notes", &["self/profile"])
        .await;

    // Bound to the notes client but addressed to this service.
    let derived = app
        .state
        .sessions
        .derive(&login.issued.token, None, "notes", level(1), false)
        .await
        .unwrap();
    assert_eq!(derived.signed.scope, vec!["/profile"]);

    let (status, body) = send(
        &app.router(),
        "POST",
        "/session/logout",
        Some(derived.signed.access_token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "no_permission");

    let session = app.store.find_session(&login.session.id).await.unwrap().unwrap();
    assert!(!session.terminated);

    let (status, _) = send(
        &app.router(),
        "POST",
        "/session/logout",
        Some(login.issued.signed.access_token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
