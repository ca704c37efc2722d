pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod permission;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::TrustConfig;
use crate::services::{
    CredentialService, KeyRing, Listeners, ProviderRegistry, SessionService, TokenService,
    TracingAuditListener,
};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TrustConfig>,
    pub store: Arc<dyn Store>,
    pub keys: Arc<KeyRing>,
    pub tokens: TokenService,
    pub credentials: CredentialService,
    pub sessions: SessionService,
}

impl AppState {
    /// Wire the engines over `store` with the providers enabled in `config`.
    pub fn new(config: TrustConfig, store: Arc<dyn Store>) -> Result<Self, AppError> {
        let registry = ProviderRegistry::from_config(&config.credentials);
        Self::with_providers(config, store, registry)
    }

    pub fn with_providers(
        config: TrustConfig,
        store: Arc<dyn Store>,
        registry: ProviderRegistry,
    ) -> Result<Self, AppError> {
        let keys = Arc::new(
            KeyRing::new(&config.jwt, config.trusted_issuers.clone())
                .map_err(AppError::ConfigError)?,
        );
        let listeners = Listeners::new().with(Arc::new(TracingAuditListener));

        let tokens = TokenService::new(
            store.clone(),
            keys.clone(),
            config.timeouts,
            config.jwt.self_app_id.clone(),
            listeners.clone(),
        );
        let credentials = CredentialService::new(store.clone(), registry, listeners.clone());
        let sessions = SessionService::new(
            store.clone(),
            tokens.clone(),
            credentials.clone(),
            listeners,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            keys,
            tokens,
            credentials,
            sessions,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/session/elevate", post(handlers::session::elevate))
        .route("/session/derive", post(handlers::session::derive))
        .route("/session/check-derive", post(handlers::session::check_derive))
        .route("/session/downgrade", post(handlers::session::downgrade))
        .route("/session/logout", post(handlers::session::logout))
        .route("/credentials/bind", post(handlers::credential::bind))
        .route("/credentials/unbind", post(handlers::credential::unbind))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/jwks.json", get(handlers::well_known::jwks))
        .route("/session/login", post(handlers::session::login))
        .route("/token/refresh", post(handlers::token::refresh))
        .route("/token/exchange", post(handlers::token::exchange))
        .route("/credentials/enroll", post(handlers::credential::enroll))
        .merge(authenticated)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::DatabaseError(anyhow::Error::new(e))
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "signing_key": state.keys.active_kid(),
    })))
}
