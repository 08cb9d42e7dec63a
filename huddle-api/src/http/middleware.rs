//! Per-client rate limiting

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use huddle_core::RateLimitError;

use crate::http::{AppError, AppState};

/// Rate limited endpoint categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitCategory {
    CreateRoom,
    RoomInfo,
    WebSocket,
}

impl RateLimitCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateRoom => "create_room",
            Self::RoomInfo => "room_info",
            Self::WebSocket => "websocket",
        }
    }
}

/// Client key for rate limiting: the socket peer address.
///
/// Forwarding headers are not trusted.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ci| ci.0.ip().to_string())
}

/// Middleware for rate limiting based on client IP and endpoint category
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    category: RateLimitCategory,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiters) = state.rate_limiters.as_deref() else {
        return Ok(next.run(request).await);
    };

    let limiter = match category {
        RateLimitCategory::CreateRoom => &limiters.create_room,
        RateLimitCategory::RoomInfo => &limiters.room_info,
        RateLimitCategory::WebSocket => &limiters.websocket,
    };

    let key = client_key(&request);
    match limiter.check(&key) {
        Ok(()) => Ok(next.run(request).await),
        Err(RateLimitError::RateLimitExceeded { retry_after_seconds }) => {
            tracing::debug!(
                client = %key,
                category = category.as_str(),
                retry_after_seconds,
                "Rate limit exceeded"
            );
            let response = (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("Retry-After", retry_after_seconds.to_string()),
                    ("X-RateLimit-Limit", limiter.quota().per_minute.to_string()),
                ],
                AppError::too_many_requests(format!(
                    "Rate limit exceeded. Try again in {retry_after_seconds} seconds"
                )),
            )
                .into_response();
            Ok(response)
        }
    }
}

/// Middleware factory for room creation
pub async fn create_room_rate_limit(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    rate_limit_middleware(state, RateLimitCategory::CreateRoom, request, next).await
}

/// Middleware factory for room lookups
pub async fn room_info_rate_limit(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    rate_limit_middleware(state, RateLimitCategory::RoomInfo, request, next).await
}

/// Middleware factory for websocket upgrades
pub async fn websocket_rate_limit(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    rate_limit_middleware(state, RateLimitCategory::WebSocket, request, next).await
}
