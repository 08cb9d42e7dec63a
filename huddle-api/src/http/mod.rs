//! HTTP API
//!
//! Routes:
//! - `GET /health`
//! - `POST /api/rooms/create` (rate limited)
//! - `GET /api/rooms/{room_id}` (rate limited)
//! - `GET /ws/{room_id}` websocket upgrade (rate limited)

pub mod error;
pub mod health;
pub mod middleware;
pub mod room;
pub mod websocket;

use axum::{middleware as axum_middleware, routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use huddle_core::{Config, RateLimitConfig, RateLimiter, SignalingServer};

pub use error::{AppError, AppResult};

/// Per-route rate limiters, absent when rate limiting is disabled
pub struct RateLimiters {
    pub create_room: RateLimiter,
    pub room_info: RateLimiter,
    pub websocket: RateLimiter,
}

impl RateLimiters {
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            create_room: RateLimiter::new(config.create_room),
            room_info: RateLimiter::new(config.room_info),
            websocket: RateLimiter::new(config.websocket),
        })
    }

    /// Forget clients whose buckets have fully refilled
    pub fn prune(&self) {
        self.create_room.prune();
        self.room_info.prune();
        self.websocket.prune();
    }
}

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<SignalingServer>,
    pub rate_limiters: Option<Arc<RateLimiters>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(server: Arc<SignalingServer>, config: Arc<Config>) -> Self {
        let rate_limiters = RateLimiters::from_config(&config.rate_limit).map(Arc::new);
        Self {
            server,
            rate_limiters,
            config,
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let rooms = Router::new()
        .route(
            "/create",
            post(room::create_room).route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::create_room_rate_limit,
            )),
        )
        .route(
            "/{room_id}",
            get(room::get_room).route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::room_info_rate_limit,
            )),
        );

    let ws = Router::new()
        .route(
            "/ws/{room_id}",
            get(websocket::websocket_handler).route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::websocket_rate_limit,
            )),
        )
        .route("/ws", get(websocket::missing_room_id))
        .route("/ws/", get(websocket::missing_room_id));

    let router = Router::new()
        .merge(health::create_health_router())
        .nest("/api/rooms", rooms)
        .merge(ws);

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    router.with_state(state)
}
