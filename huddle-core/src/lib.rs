//! Huddle core: signaling protocol, rooms and the connection lifecycle
//!
//! Clients join named rooms over a persistent connection, negotiate media with
//! the server-side SFU and exchange end-to-end encrypted metadata that the
//! server relays without reading.

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod rate_limit;
pub mod signaling;
pub mod validation;

pub use config::{load_config, Config, LoggingConfig, RateLimitConfig, RouteQuota, SignalingConfig};
pub use connection::{ConnectionHandle, MessageStream, OutboundReceiver, RecvError};
pub use error::{Error, Result};
pub use protocol::{Message, MessageKind, Payload, ProtocolError};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use signaling::SignalingServer;
