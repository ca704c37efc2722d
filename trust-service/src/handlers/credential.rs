use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{BindRequest, CredentialResponse, EnrollRequest, UnbindRequest},
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Create a new user with a first login credential
pub async fn enroll(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EnrollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let credential = state
        .credentials
        .enroll(req.credential_type, &req.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(CredentialResponse::from(credential))))
}

pub async fn bind(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<BindRequest>,
) -> Result<impl IntoResponse, AppError> {
    let credential = state
        .credentials
        .bind_credential(
            &user.0.token,
            req.credential_type,
            req.credential_id.as_deref(),
            &req.payload,
        )
        .await?;
    Ok((StatusCode::OK, Json(CredentialResponse::from(credential))))
}

pub async fn unbind(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<UnbindRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .unbind_credential(&user.0.token, &req.credential_id, req.mode, &req.payload)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
