use crate::engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::CardNotFound(_) | EngineError::KeyNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            EngineError::InvalidTransition { .. } | EngineError::Removed(_) => {
                AppError::Conflict(err.to_string())
            }
            EngineError::Archive(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardId, CardKey, CardState, Transition};

    #[test]
    fn test_engine_errors_map_to_status() {
        let id = CardId::new();
        let cases = [
            (EngineError::CardNotFound(id), StatusCode::NOT_FOUND),
            (
                EngineError::KeyNotFound(CardKey::new("5m:1.00")),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::InvalidTransition {
                    id,
                    from: CardState::Gray,
                    transition: Transition::Close,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::Removed(id), StatusCode::CONFLICT),
            (
                EngineError::Archive("down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
