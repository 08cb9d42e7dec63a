// Huddle API Library
//
// HTTP surface of the signaling server: health, room endpoints and the
// websocket transport

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState, RateLimiters};
