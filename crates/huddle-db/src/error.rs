use huddle_types::models::ValidationError;

/// Failure taxonomy for every chat store operation.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Acting on a room without an active participant row, or without the
    /// role the operation needs.
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage operation timed out")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn not_participant() -> Self {
        Self::Authorization("user is not a participant in this room".into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(msg))
    }

    /// True for faults inside the service rather than in the request.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Encoding(_) | Self::Internal(_))
    }

    /// Text safe to hand back to a client. Internal faults are reported
    /// generically; their detail only goes to the log.
    pub fn client_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Encoding(_) | Self::Internal(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_is_hidden() {
        let err = ChatError::Storage(rusqlite::Error::InvalidQuery);
        assert!(err.is_internal());
        assert_eq!(err.client_message(), "internal server error");

        let err = ChatError::validation("text messages require content");
        assert!(!err.is_internal());
        assert_eq!(err.client_message(), "invalid input: text messages require content");
    }
}
