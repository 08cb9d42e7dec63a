use thiserror::Error;

use crate::protocol::ProtocolError;

/// Wire codes carried by `error` messages
pub mod codes {
    pub const INVALID_PUBLIC_KEY: &str = "INVALID_PUBLIC_KEY";
    pub const ROOM_FULL: &str = "ROOM_FULL";
    pub const TOO_MANY_ROOMS: &str = "TOO_MANY_ROOMS";
    pub const DUPLICATE_PARTICIPANT: &str = "DUPLICATE_PARTICIPANT";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Room {0} is full")]
    RoomFull(String),

    #[error("Room limit reached")]
    TooManyRooms,

    #[error("Participant {0} is already in the room")]
    DuplicateParticipant(String),

    #[error("Session error: {0}")]
    Session(#[source] anyhow::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Code sent to clients in an `error` message
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPublicKey(_) => codes::INVALID_PUBLIC_KEY,
            Self::RoomFull(_) => codes::ROOM_FULL,
            Self::TooManyRooms => codes::TOO_MANY_ROOMS,
            Self::DuplicateParticipant(_) => codes::DUPLICATE_PARTICIPANT,
            Self::Protocol(_)
            | Self::Session(_)
            | Self::ConnectionClosed
            | Self::Config(_)
            | Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidPublicKey("empty".into()).code(),
            "INVALID_PUBLIC_KEY"
        );
        assert_eq!(Error::RoomFull("r1".into()).code(), "ROOM_FULL");
        assert_eq!(Error::TooManyRooms.code(), "TOO_MANY_ROOMS");
        assert_eq!(
            Error::DuplicateParticipant("g1".into()).code(),
            "DUPLICATE_PARTICIPANT"
        );
        assert_eq!(Error::ConnectionClosed.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_error_display() {
        let err = Error::DuplicateParticipant("g1".into());
        assert_eq!(err.to_string(), "Participant g1 is already in the room");
    }
}
