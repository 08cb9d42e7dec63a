//! webrtc-rs backed peer sessions

use crate::config::SfuConfig;
use crate::session::{
    IceCandidate, PeerSession, SdpType, SessionDescription, SessionEvent, SessionEvents,
    SessionFactory,
};
use crate::track::{RelayTrack, RemoteTrackSource, TrackKind};
use crate::types::{PeerId, TrackId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("failed to register default codecs")?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .context("failed to register default interceptors")?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Creates webrtc-rs peer connections configured with the SFU's STUN servers
pub struct WebRtcSessionFactory {
    api: API,
    config: SfuConfig,
}

impl WebRtcSessionFactory {
    pub fn new(config: SfuConfig) -> Result<Self> {
        Ok(Self {
            api: build_api()?,
            config,
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.effective_stun_servers(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl SessionFactory for WebRtcSessionFactory {
    async fn create_session(
        &self,
        peer_id: &PeerId,
    ) -> Result<(Arc<dyn PeerSession>, SessionEvents)> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .context("failed to create peer connection")?,
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let candidate_tx = event_tx.clone();
        let candidate_peer = peer_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        if candidate_tx
                            .send(SessionEvent::LocalCandidate(init.into()))
                            .is_err()
                        {
                            debug!(participant = %candidate_peer, "Session events dropped, candidate discarded");
                        }
                    }
                    Err(e) => {
                        warn!(participant = %candidate_peer, error = %e, "Failed to serialize local candidate");
                    }
                }
            }
            Box::pin(async {})
        }));

        let track_tx = event_tx;
        let track_peer = peer_id.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            debug!(
                participant = %track_peer,
                track = %track.id(),
                kind = %track.kind(),
                ssrc = track.ssrc(),
                "Remote track arrived"
            );
            let source: Arc<dyn RemoteTrackSource> = Arc::new(WebRtcRemoteTrack { track });
            if track_tx.send(SessionEvent::RemoteTrack(source)).is_err() {
                debug!(participant = %track_peer, "Session events dropped, track discarded");
            }
            Box::pin(async {})
        }));

        let state_peer = peer_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            debug!(participant = %state_peer, state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));

        let session = WebRtcSession {
            peer_id: peer_id.clone(),
            pc,
            senders: Mutex::new(HashMap::new()),
            rtcp_buffer_size: self.config.rtcp_buffer_size,
        };

        Ok((Arc::new(session), event_rx))
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    rtc.context("invalid session description")
}

/// A webrtc-rs peer connection
pub struct WebRtcSession {
    peer_id: PeerId,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackId, Arc<RTCRtpSender>>>,
    rtcp_buffer_size: usize,
}

impl WebRtcSession {
    #[must_use]
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .context("set_remote_description failed")
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .context("create_answer failed")?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("create_offer failed")?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .context("set_local_description failed")
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .context("add_ice_candidate failed")
    }

    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<()> {
        let mut senders = self.senders.lock().await;
        if senders.contains_key(track.id()) {
            return Ok(());
        }

        let sender = self
            .pc
            .add_track(track.local())
            .await
            .context("add_track failed")?;
        senders.insert(track.id().clone(), Arc::clone(&sender));
        drop(senders);

        // Interceptors only run while RTCP is being read.
        let buffer_size = self.rtcp_buffer_size;
        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            while sender.read(&mut buf).await.is_ok() {}
        });

        debug!(participant = %self.peer_id, track = %track.id(), "Relay track attached");
        Ok(())
    }

    async fn remove_track(&self, track_id: &TrackId) -> Result<bool> {
        let Some(sender) = self.senders.lock().await.remove(track_id) else {
            return Ok(false);
        };
        self.pc
            .remove_track(&sender)
            .await
            .context("remove_track failed")?;
        debug!(participant = %self.peer_id, track = %track_id, "Relay track detached");
        Ok(true)
    }

    async fn ready_for_offer(&self) -> bool {
        self.pc.signaling_state() == RTCSignalingState::Stable
    }

    async fn close(&self) -> Result<()> {
        self.senders.lock().await.clear();
        self.pc.close().await.context("failed to close peer connection")
    }
}

/// A remote track received on a webrtc-rs peer connection
pub struct WebRtcRemoteTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl RemoteTrackSource for WebRtcRemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn stream_id(&self) -> String {
        self.track.stream_id()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::from(self.track.kind())
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        self.track.codec().capability
    }

    async fn read_rtp(&self) -> Result<Packet> {
        let (packet, _attributes) = self.track.read_rtp().await?;
        Ok(packet)
    }
}
