use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use radio_core::AudioError;
use thiserror::Error;

/// Main error type for the radio server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) | ServerError::Audio(AudioError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ServerError::Audio(AudioError::Closed(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let body = serde_json::json!({
            "errorCode": status.as_u16(),
            "errorMessage": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ServerError>;
