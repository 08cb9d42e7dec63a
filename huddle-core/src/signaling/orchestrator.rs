//! SFU orchestration
//!
//! Wires published tracks to subscriber sessions and drives server-side
//! renegotiation. All entry points run in the calling participant's own
//! connection task; cross-participant work (fan-out, detach) only touches
//! other participants through their sessions and negotiation locks.

use futures::future::join_all;
use huddle_sfu::{
    PeerSession, RelayTrack, RemoteTrackSource, SdpType, SessionDescription, SessionEvent,
    SessionEvents, SessionFactory,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{Participant, Room};
use crate::protocol::{Message, Payload, SdpData};
use crate::{Error, Result};

pub struct SfuOrchestrator {
    factory: Arc<dyn SessionFactory>,
}

impl SfuOrchestrator {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    /// Create the participant's peer session and return its event stream
    pub async fn init_session(&self, participant: &Arc<Participant>) -> Result<SessionEvents> {
        if !participant.begin_session() {
            return Err(Error::Internal(format!(
                "session already initialized for {}",
                participant.id()
            )));
        }

        let (session, events) = self
            .factory
            .create_session(participant.id())
            .await
            .map_err(Error::Session)?;

        if let Err(session) = participant.activate_session(session) {
            // Participant left while the session was being created.
            if let Err(e) = session.close().await {
                debug!(participant = %participant.id(), error = %e, "Failed to close orphaned session");
            }
            return Err(Error::ConnectionClosed);
        }

        debug!(participant = %participant.id(), "Peer session initialized");
        Ok(events)
    }

    /// Subscribe a newly admitted participant to tracks published before it
    /// joined. The offer is sent once the client has negotiated.
    pub async fn bootstrap(&self, participant: &Arc<Participant>, tracks: &[Arc<RelayTrack>]) {
        let Some(session) = participant.session() else {
            return;
        };

        let mut attached = 0;
        for track in tracks.iter().filter(|t| t.publisher() != participant.id()) {
            match session.add_track(Arc::clone(track)).await {
                Ok(()) => attached += 1,
                Err(e) => warn!(
                    participant = %participant.id(),
                    track = %track.id(),
                    error = %e,
                    "Failed to attach existing track"
                ),
            }
        }

        if attached > 0 {
            participant.mark_renegotiation_pending();
            debug!(participant = %participant.id(), tracks = attached, "Existing tracks attached");
        }
    }

    /// Handle an inbound offer, answer or ICE candidate
    pub async fn handle_signal(&self, room: &Room, participant: &Arc<Participant>, payload: Payload) {
        let Some(session) = participant.session() else {
            debug!(
                participant = %participant.id(),
                kind = %payload.kind(),
                "No peer session, ignoring signaling message"
            );
            return;
        };

        match payload {
            Payload::Offer(offer) => {
                let _guard = participant.lock_negotiation().await;
                match answer_offer(session.as_ref(), offer.sdp).await {
                    Ok(answer) => {
                        let message = Message::new(Payload::Answer(SdpData {
                            sdp: answer.sdp,
                            sdp_type: Some(SdpType::Answer),
                        }));
                        room.send_to(participant, &message);
                    }
                    Err(e) => warn!(participant = %participant.id(), error = %e, "Failed to answer offer"),
                }
            }
            Payload::Answer(answer) => {
                let _guard = participant.lock_negotiation().await;
                if let Err(e) = session
                    .set_remote_description(SessionDescription::answer(answer.sdp))
                    .await
                {
                    warn!(participant = %participant.id(), error = %e, "Failed to apply answer");
                }
            }
            Payload::IceCandidate(candidate) => {
                if let Err(e) = session.add_ice_candidate(candidate).await {
                    warn!(participant = %participant.id(), error = %e, "Failed to add ICE candidate");
                }
            }
            other => {
                debug!(kind = %other.kind(), "Not a signaling message");
                return;
            }
        }

        if participant.take_renegotiation_pending() {
            self.renegotiate(room, participant).await;
        }
    }

    /// Handle an event raised by the participant's own session
    pub async fn handle_event(&self, room: &Room, participant: &Arc<Participant>, event: SessionEvent) {
        match event {
            SessionEvent::LocalCandidate(candidate) => {
                room.send_to(participant, &Message::new(Payload::IceCandidate(candidate)));
            }
            SessionEvent::RemoteTrack(source) => self.publish(room, participant, source).await,
        }
    }

    async fn publish(&self, room: &Room, publisher: &Arc<Participant>, source: Arc<dyn RemoteTrackSource>) {
        let track = Arc::new(RelayTrack::mirror(publisher.id().clone(), source.as_ref()));

        let Some(subscribers) = room.publish_track(Arc::clone(&track)) else {
            debug!(participant = %publisher.id(), track = %track.id(), "Publisher already left, dropping track");
            return;
        };
        publisher.add_published_track(Arc::clone(&track));
        track.spawn_forwarder(source);

        info!(
            room = %room.slug(),
            participant = %publisher.id(),
            track = %track.id(),
            subscribers = subscribers.len(),
            "Track published"
        );

        join_all(subscribers.iter().map(|subscriber| self.subscribe(room, subscriber, &track))).await;
    }

    async fn subscribe(&self, room: &Room, subscriber: &Arc<Participant>, track: &Arc<RelayTrack>) {
        let Some(session) = subscriber.session() else {
            return;
        };
        if let Err(e) = session.add_track(Arc::clone(track)).await {
            warn!(
                participant = %subscriber.id(),
                track = %track.id(),
                error = %e,
                "Failed to attach track"
            );
            return;
        }
        self.renegotiate(room, subscriber).await;
    }

    /// Send a fresh offer to the participant, or defer it until the current
    /// negotiation completes
    pub async fn renegotiate(&self, room: &Room, participant: &Arc<Participant>) {
        let Some(session) = participant.session() else {
            return;
        };

        let _guard = participant.lock_negotiation().await;
        if !session.ready_for_offer().await {
            participant.mark_renegotiation_pending();
            debug!(participant = %participant.id(), "Renegotiation deferred");
            return;
        }

        match create_offer(session.as_ref()).await {
            Ok(offer) => {
                let message = Message::new(Payload::Offer(SdpData {
                    sdp: offer.sdp,
                    sdp_type: Some(SdpType::Offer),
                }));
                room.send_to(participant, &message);
            }
            Err(e) => warn!(participant = %participant.id(), error = %e, "Failed to renegotiate"),
        }
    }

    /// Detach a departed publisher's tracks from everyone still in the room
    pub async fn detach_tracks(&self, room: &Room, tracks: &[Arc<RelayTrack>]) {
        if tracks.is_empty() {
            return;
        }

        let members = room.members();
        join_all(members.iter().map(|member| async move {
            let Some(session) = member.session() else {
                return;
            };
            let mut removed = false;
            for track in tracks {
                match session.remove_track(track.id()).await {
                    Ok(true) => removed = true,
                    Ok(false) => {}
                    Err(e) => warn!(
                        participant = %member.id(),
                        track = %track.id(),
                        error = %e,
                        "Failed to detach track"
                    ),
                }
            }
            if removed {
                self.renegotiate(room, member).await;
            }
        }))
        .await;
    }

    /// Close the participant's session; later calls are no-ops
    pub async fn close_session(&self, participant: &Participant) {
        if let Some(session) = participant.take_session() {
            if let Err(e) = session.close().await {
                debug!(participant = %participant.id(), error = %e, "Failed to close peer session");
            }
        }
    }
}

async fn answer_offer(session: &dyn PeerSession, sdp: String) -> anyhow::Result<SessionDescription> {
    session
        .set_remote_description(SessionDescription::offer(sdp))
        .await?;
    let answer = session.create_answer().await?;
    session.set_local_description(answer.clone()).await?;
    Ok(answer)
}

async fn create_offer(session: &dyn PeerSession) -> anyhow::Result<SessionDescription> {
    let offer = session.create_offer().await?;
    session.set_local_description(offer.clone()).await?;
    Ok(offer)
}
