//! Huddle SFU (Selective Forwarding Unit) engine layer
//!
//! This crate wraps the WebRTC engine behind a small capability surface so the
//! signaling core can drive peer sessions without knowing about ICE, DTLS or
//! codecs. It knows nothing about rooms or admission.
//!
//! ## Architecture
//!
//! - **`PeerSession`**: one server-side peer connection (negotiation, ICE, tracks)
//! - **`SessionFactory`**: creates sessions together with their event stream
//! - **`SessionEvent`**: engine callbacks (local ICE candidates, remote tracks)
//!   delivered as channel messages instead of callback invocations
//! - **`RelayTrack`**: a server-held track mirroring a publisher's remote track,
//!   fed by a packet forwarding task and attached to subscriber sessions
//! - **`WebRtcSessionFactory`**: the webrtc-rs backed implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_sfu::{PeerId, SessionFactory, SfuConfig, WebRtcSessionFactory};
//!
//! let factory = WebRtcSessionFactory::new(SfuConfig::default())?;
//! let (session, mut events) = factory.create_session(&PeerId::from("alice")).await?;
//! while let Some(event) = events.recv().await {
//!     // forward candidates to the client, fan out remote tracks
//! }
//! ```

mod config;
mod engine;
mod session;
mod track;
mod types;

pub use config::SfuConfig;
pub use engine::{WebRtcRemoteTrack, WebRtcSession, WebRtcSessionFactory};
pub use session::{
    IceCandidate, PeerSession, SdpType, SessionDescription, SessionEvent, SessionEvents,
    SessionFactory,
};
pub use track::{RelayTrack, RemoteTrackSource, TrackKind, TrackStats};
pub use types::{PeerId, TrackId};

/// RTP packet type forwarded between remote and relay tracks
pub use webrtc::rtp::packet::Packet as RtpPacket;
/// Codec capability mirrored from a remote track onto its relay track
pub use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability as CodecCapability;
