//! Peer session capability
//!
//! The signaling core drives media negotiation only through these traits.
//! Engine callbacks are surfaced as [`SessionEvent`]s on a channel returned
//! together with the session, so the caller decides in which task they run.

use crate::track::{RelayTrack, RemoteTrackSource};
use crate::types::{PeerId, TrackId};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description (SDP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate, in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Event raised by the engine for one session
#[derive(Clone)]
pub enum SessionEvent {
    /// A local ICE candidate was gathered and must reach the remote peer
    LocalCandidate(IceCandidate),
    /// The remote peer started publishing a media stream
    RemoteTrack(Arc<dyn RemoteTrackSource>),
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.id()).finish(),
        }
    }
}

/// Receiving half of a session's event stream.
///
/// Ends once the session is closed and the engine has dropped its callbacks.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// One server-side peer connection
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a relay track for sending. Attaching the same track twice is a no-op.
    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<()>;

    /// Detach a previously attached relay track. Returns whether it was attached.
    async fn remove_track(&self, track_id: &TrackId) -> Result<bool>;

    /// True when a server-side offer can be created right now, i.e. the
    /// signaling state is stable. A session that has never negotiated counts.
    async fn ready_for_offer(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Creates peer sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        peer_id: &PeerId,
    ) -> Result<(Arc<dyn PeerSession>, SessionEvents)>;
}
