use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{DeriveRequest, DowngradeRequest, ElevateRequest, LoginRequest, LogoutResponse, TokenResponse},
    middleware::AuthUser,
    models::{SecurityLevel, SessionEnvironment},
    utils::ValidatedJson,
    AppState,
};

fn environment(headers: &HeaderMap) -> SessionEnvironment {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    SessionEnvironment {
        ip: header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header("user-agent"),
    }
}

fn level(value: u8) -> Result<SecurityLevel, AppError> {
    SecurityLevel::new(value).map_err(|e| AppError::bad_request("invalid_security_level", e.to_string()))
}

/// Open a session with a login-capable credential
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .sessions
        .login(
            req.credential_type,
            &req.payload,
            environment(&headers),
            req.with_code,
        )
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(result.issued))))
}

/// Verify another credential and add a higher slot to the session
pub async fn elevate(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ElevateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let current = user.0.token;
    let verified = state
        .credentials
        .verify(&current, req.credential_type, level(req.level)?, &req.payload)
        .await?;
    let issued = state
        .sessions
        .elevate(&current, &verified, req.with_code)
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(issued))))
}

/// Mint a token for a client application
pub async fn derive(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<DeriveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .sessions
        .derive(
            &user.0.token,
            req.target_app_id.as_deref(),
            &req.client_app_id,
            level(req.level)?,
            req.with_code,
        )
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(issued))))
}

/// Preview the permissions a derivation would grant
pub async fn check_derive(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<DeriveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = state
        .sessions
        .check_derive(
            &user.0.token,
            req.target_app_id.as_deref(),
            &req.client_app_id,
            level(req.level)?,
        )
        .await?;
    Ok((StatusCode::OK, Json(plan)))
}

/// Fall back to an existing lower slot
pub async fn downgrade(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<DowngradeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (slot, signed) = state
        .sessions
        .downgrade(&user.0.token, level(req.level)?)
        .await?;
    Ok((
        StatusCode::OK,
        Json(TokenResponse {
            session_id: slot.session_id,
            token_id: slot.id,
            token: Some(signed),
            code: None,
        }),
    ))
}

/// Terminate the session of the presented token
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let token = user.0.token;
    let terminated_tokens = state.sessions.terminate(&token).await?;
    Ok((
        StatusCode::OK,
        Json(LogoutResponse {
            session_id: token.session_id,
            terminated_tokens,
        }),
    ))
}
