// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert huddle_core errors to HTTP errors
impl From<huddle_core::Error> for AppError {
    fn from(err: huddle_core::Error) -> Self {
        use huddle_core::Error;

        match err {
            Error::Protocol(e) => Self::bad_request(e.to_string()),
            Error::InvalidPublicKey(msg) => Self::bad_request(format!("Invalid public key: {msg}")),
            Error::RoomFull(room) => Self::conflict(format!("Room {room} is full")),
            Error::TooManyRooms => Self::service_unavailable("Room limit reached"),
            Error::DuplicateParticipant(id) => {
                Self::conflict(format!("Participant {id} is already in the room"))
            }
            Error::Session(e) => {
                tracing::error!("Session error: {e:#}");
                Self::internal_server_error("Media session error")
            }
            Error::ConnectionClosed => Self::bad_request("Connection closed"),
            Error::Config(msg) | Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

/// Convert serde_json errors to HTTP errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("Invalid JSON: {err}"))
    }
}

/// Convert anyhow errors to HTTP errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {err:#}");
        Self::internal_server_error("Internal server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let err: AppError = huddle_core::Error::RoomFull("r1".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: AppError = huddle_core::Error::TooManyRooms.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err: AppError = huddle_core::Error::Internal("secret detail".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_display() {
        let err = AppError::too_many_requests("slow down");
        assert_eq!(err.to_string(), "429 Too Many Requests: slow down");
    }
}
