//! Credential engine: consumption, chain blacklist, bind and unbind.

mod common;

use common::{level, TestApp};
use serde_json::json;
use trust_service::{
    models::{Credential, CredentialDraft, CredentialType},
    services::{ServiceError, UnbindMode},
    store::Store,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_use_is_won_by_exactly_one_caller() {
    let app = TestApp::spawn().await;
    let mut draft = CredentialDraft::reusable("digest".to_string(), Vec::new(), level(2), 1);
    draft.use_count = 1;
    let credential = Credential::from_draft(None, "user_1".to_string(), CredentialType::Totp, draft);
    app.store.upsert_credential(&credential).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let credentials = app.state.credentials.clone();
            let id = credential.id.clone();
            tokio::spawn(async move { credentials.check_credential_use(&id).await })
        })
        .collect();

    let mut won = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(ServiceError::CredentialExhausted) => exhausted += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(exhausted, 7);

    let stored = app.store.find_credential(&credential.id).await.unwrap().unwrap();
    assert_eq!(stored.use_count, 0);
    assert_eq!(stored.access_count, 1);
}

#[tokio::test]
async fn blacklist_skips_the_login_credential() {
    let app = TestApp::spawn().await;
    let password = app.enroll("alice@example.com").await;
    let current = app.login("alice@example.com").await.issued.token;
    let code = app.bind_code(&current, "135790", 2).await;

    let verified = app
        .state
        .credentials
        .verify(&current, CredentialType::Totp, level(2), &json!({ "code": "135790" }))
        .await
        .unwrap();
    assert_eq!(verified.credential_id, code.id);
    let elevated = app
        .state
        .sessions
        .elevate(&current, &verified, false)
        .await
        .unwrap()
        .token;

    app.seed_app("notes", 4, None).await;
    app.install(&current.user_id, "notes", &["notes/documents/*"]).await;
    let derived = app
        .state
        .sessions
        .derive(&elevated, Some("notes"), "notes", level(2), false)
        .await
        .unwrap()
        .token;

    let credentials = &app.state.credentials;
    let by_code = credentials
        .credential_blacklist(&derived.id, Some(CredentialType::Totp))
        .await
        .unwrap();
    assert!(by_code.contains(&code.id));
    assert!(!by_code.contains(&password.id));

    let by_password = credentials
        .credential_blacklist(&derived.id, Some(CredentialType::Password))
        .await
        .unwrap();
    assert!(by_password.is_empty());

    let all = credentials.credential_blacklist(&derived.id, None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all.contains(&password.id));

    let chain = credentials.credential_chain(&derived.id).await.unwrap();
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[0].token.index, Some(0));
    assert_eq!(chain[3].token.id, derived.id);
}

#[tokio::test]
async fn a_spent_factor_cannot_elevate_the_same_chain_twice() {
    let app = TestApp::spawn().await;
    app.enroll("bob@example.com").await;
    let current = app.login("bob@example.com").await.issued.token;
    app.bind_code(&current, "222222", 2).await;

    let verified = app
        .state
        .credentials
        .verify(&current, CredentialType::Totp, level(2), &json!({ "code": "222222" }))
        .await
        .unwrap();
    let elevated = app
        .state
        .sessions
        .elevate(&current, &verified, false)
        .await
        .unwrap()
        .token;
    app.bind_code(&elevated, "333333", 3).await;

    let result = app
        .state
        .credentials
        .verify(&elevated, CredentialType::Totp, level(2), &json!({ "code": "222222" }))
        .await;
    assert!(matches!(result, Err(ServiceError::CredentialReused)));

    let result = app
        .state
        .credentials
        .verify(&elevated, CredentialType::Totp, level(3), &json!({ "code": "333333" }))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn enroll_rejects_a_taken_identifier() {
    let app = TestApp::spawn().await;
    app.enroll("carol@example.com").await;

    let result = app
        .state
        .credentials
        .enroll(
            CredentialType::Password,
            &json!({ "identifier": "CAROL@example.com", "password": "another-password" }),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::DuplicateValue)));
}

#[tokio::test]
async fn enroll_requires_a_login_capable_provider() {
    let app = TestApp::spawn().await;

    let result = app
        .state
        .credentials
        .enroll(CredentialType::Totp, &json!({ "code": "1", "level": 1 }))
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidPayload(_))));

    let result = app
        .state
        .credentials
        .enroll(CredentialType::Webauthn, &json!({}))
        .await;
    assert!(matches!(result, Err(ServiceError::ProviderNotEnabled(_))));
}

#[tokio::test]
async fn password_provider_allows_a_single_password() {
    let app = TestApp::spawn().await;
    app.enroll("dave@example.com").await;
    let current = app.login("dave@example.com").await.issued.token;

    let result = app
        .state
        .credentials
        .bind_credential(
            &current,
            CredentialType::Password,
            None,
            &json!({ "identifier": "dave2@example.com", "password": "second-password" }),
        )
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::NoNewBindingAllowed(CredentialType::Password))
    ));
}

#[tokio::test]
async fn rebinding_keeps_the_credential_id() {
    let app = TestApp::spawn().await;
    let password = app.enroll("erin@example.com").await;
    let current = app.login("erin@example.com").await.issued.token;

    let rebound = app
        .state
        .credentials
        .bind_credential(
            &current,
            CredentialType::Password,
            Some(&password.id),
            &json!({ "identifier": "erin@example.com", "password": "rotated-password" }),
        )
        .await
        .unwrap();

    assert_eq!(rebound.id, password.id);
    assert_eq!(rebound.created_at, password.created_at);

    let stale = app
        .state
        .sessions
        .login(
            CredentialType::Password,
            &json!({ "identifier": "erin@example.com", "password": common::PASSWORD }),
            Default::default(),
            false,
        )
        .await;
    assert!(matches!(stale, Err(ServiceError::InvalidCredentials)));
}

#[tokio::test]
async fn binding_above_the_caller_needs_the_callers_level() {
    let app = TestApp::spawn().await;
    app.enroll("frank@example.com").await;
    let current = app.login("frank@example.com").await.issued.token;
    app.bind_code(&current, "444444", 2).await;

    let result = app
        .state
        .credentials
        .bind_credential(
            &current,
            CredentialType::Totp,
            None,
            &json!({ "code": "555555", "level": 3 }),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::InsufficientSecurityLevel)));
}

#[tokio::test]
async fn the_last_login_credential_cannot_be_unbound() {
    let app = TestApp::spawn().await;
    let password = app.enroll("grace@example.com").await;
    let current = app.login("grace@example.com").await.issued.token;
    app.bind_code(&current, "666666", 1).await;

    let result = app
        .state
        .credentials
        .unbind_credential(&current, &password.id, UnbindMode::Disable, &json!({}))
        .await;

    assert!(matches!(result, Err(ServiceError::LastLoginCredential)));
}

#[tokio::test]
async fn deleting_needs_the_credentials_level_but_disabling_does_not() {
    let app = TestApp::spawn().await;
    app.enroll("heidi@example.com").await;
    let current = app.login("heidi@example.com").await.issued.token;
    let code = app.bind_code(&current, "777777", 2).await;

    let result = app
        .state
        .credentials
        .unbind_credential(&current, &code.id, UnbindMode::Delete, &json!({}))
        .await;
    assert!(matches!(result, Err(ServiceError::InsufficientSecurityLevel)));

    app.state
        .credentials
        .unbind_credential(&current, &code.id, UnbindMode::Disable, &json!({}))
        .await
        .unwrap();
    let stored = app.store.find_credential(&code.id).await.unwrap().unwrap();
    assert!(stored.disabled);

    let result = app
        .state
        .credentials
        .verify(&current, CredentialType::Totp, level(2), &json!({ "code": "777777" }))
        .await;
    assert!(matches!(result, Err(ServiceError::InsufficientSecurityLevel)));
}

#[tokio::test]
async fn unbinding_someone_elses_credential_is_not_found() {
    let app = TestApp::spawn().await;
    let other = app.enroll("ivan@example.com").await;
    app.enroll("judy@example.com").await;
    let current = app.login("judy@example.com").await.issued.token;

    let result = app
        .state
        .credentials
        .unbind_credential(&current, &other.id, UnbindMode::Disable, &json!({}))
        .await;

    assert!(matches!(result, Err(ServiceError::CredentialNotFound)));
}
