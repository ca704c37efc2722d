use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{ExchangeRequest, RefreshRequest},
    services::ClientCredentials,
    utils::{PlainSecret, ValidatedJson},
    AppState,
};

/// Redeem a refresh token for a new access token
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = req.client_id.map(|client_id| ClientCredentials {
        client_id,
        client_secret: PlainSecret::new(req.client_secret.unwrap_or_default()),
    });

    let signed = state
        .tokens
        .refresh_token(&req.refresh_token, client.as_ref(), req.target_app_id.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(signed)))
}

/// Trade an exchange code for its token
pub async fn exchange(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ExchangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signed = state
        .tokens
        .redeem_exchange_code(&req.code, req.target_app_id.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(signed)))
}
