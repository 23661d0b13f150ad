use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use huddle_db::ChatError;

/// Error type for every REST handler. Renders as `{ "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Chat(ChatError),
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self::Chat(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Chat(e) => {
                let status = match &e {
                    ChatError::Authorization(_) => StatusCode::FORBIDDEN,
                    ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                    ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                    ChatError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    ChatError::Storage(_) | ChatError::Encoding(_) | ChatError::Internal(_) => {
                        error!("request failed: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.client_message())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
