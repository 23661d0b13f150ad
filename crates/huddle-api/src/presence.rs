use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let presence = state.presence.get(user_id).await?;
    Ok(Json(presence))
}
