//! Refresh rotation and exchange codes.

mod common;

use common::TestApp;
use trust_service::services::ServiceError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_redeem_once() {
    let app = TestApp::spawn().await;
    app.enroll("alice@example.com").await;
    let login = app.login("alice@example.com").await;
    let refresh = login.issued.signed.refresh_token.unwrap();

    let first = {
        let tokens = app.state.tokens.clone();
        let refresh = refresh.clone();
        tokio::spawn(async move { tokens.refresh_token(&refresh, None, None).await })
    };
    let second = {
        let tokens = app.state.tokens.clone();
        let refresh = refresh.clone();
        tokio::spawn(async move { tokens.refresh_token(&refresh, None, None).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ServiceError::InvalidRefreshToken))));
}

#[tokio::test]
async fn refresh_rotates_the_artifact() {
    let app = TestApp::spawn().await;
    app.enroll("bob@example.com").await;
    let login = app.login("bob@example.com").await;
    let original = login.issued.signed.refresh_token.clone().unwrap();

    let refreshed = app
        .state
        .tokens
        .refresh_token(&original, None, None)
        .await
        .unwrap();
    let rotated = refreshed.refresh_token.clone().unwrap();
    assert_ne!(rotated, original);

    let claims = app
        .state
        .tokens
        .verify(&refreshed.access_token, None)
        .unwrap();
    assert_eq!(claims.jti, login.issued.token.id);

    let result = app.state.tokens.refresh_token(&original, None, None).await;
    assert!(matches!(result, Err(ServiceError::InvalidRefreshToken)));

    app.state
        .tokens
        .refresh_token(&rotated, None, None)
        .await
        .unwrap();

    let token = app.token(&login.issued.token.id).await;
    assert_eq!(token.issued_count, 3);
}

#[tokio::test]
async fn unknown_refresh_token_is_rejected() {
    let app = TestApp::spawn().await;

    let result = app
        .state
        .tokens
        .refresh_token("not-a-refresh-token", None, None)
        .await;

    assert!(matches!(result, Err(ServiceError::InvalidRefreshToken)));
}

#[tokio::test]
async fn exchange_code_is_single_use() {
    let app = TestApp::spawn().await;
    app.enroll("carol@example.com").await;
    let login = app.login_with("carol@example.com", true).await;
    let code = login.issued.code.clone().expect("login should return a code");

    let signed = app
        .state
        .tokens
        .redeem_exchange_code(&code, None)
        .await
        .unwrap();
    let context = app
        .state
        .tokens
        .authenticate(&signed.access_token)
        .await
        .unwrap();
    assert_eq!(context.token.id, login.issued.token.id);

    let result = app.state.tokens.redeem_exchange_code(&code, None).await;
    assert!(matches!(result, Err(ServiceError::InvalidExchangeCode)));
}

#[tokio::test]
async fn foreign_audience_is_rejected() {
    let app = TestApp::spawn().await;
    app.enroll("dave@example.com").await;
    let login = app.login("dave@example.com").await;

    let result = app
        .state
        .tokens
        .verify(&login.issued.signed.access_token, Some("notes"));

    assert!(matches!(result, Err(ServiceError::InvalidToken)));
}
