use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

/// Validate the bearer credential and attach the caller's `Identity` to the
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let identity = state.verifier.verify(bearer.token()).map_err(|e| {
        debug!("rejected credential: {}", e);
        ApiError::Unauthorized
    })?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
