use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::IntoResponse,
};
use service_core::error::AppError;

use crate::{permission::matches_any, services::AuthContext, AppState};

/// Require a live bearer token issued for this service whose scope grants
/// the request path.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AppError> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::unauthorized("missing_token", "Missing or invalid Authorization header")
        })?;

    let context = state.tokens.authenticate(bearer).await.map_err(|e| {
        tracing::debug!(error = %e, "Bearer token rejected");
        AppError::from(e)
    })?;

    let path = req.uri().path();
    if !matches_any(&context.claims.perm, path) {
        tracing::warn!(
            token_id = %context.token.id,
            client_id = ?context.token.client_id,
            path = %path,
            granted = ?context.claims.perm,
            "Token scope does not cover route"
        );
        return Err(AppError::forbidden(
            "no_permission",
            format!("Token does not grant {}", path),
        ));
    }

    // Store the verified context so handlers can access it
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

/// Extractor for the authenticated token of the current request
pub struct AuthUser(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<AuthContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth context missing from request extensions"
            ))
        })?;

        Ok(AuthUser(context.clone()))
    }
}
