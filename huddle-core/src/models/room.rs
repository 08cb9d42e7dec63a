use chrono::{DateTime, Utc};
use huddle_sfu::{RelayTrack, TrackStats};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::models::Participant;
use crate::protocol::{Message, ParticipantStatus, ParticipantsData, Payload, PublicKeysData, Role};
use crate::validation::validate_public_key;
use crate::{Error, Result};

/// Membership, key store and published tracks of one room.
///
/// Every mutation happens under the room's lock; nothing is sent while it is
/// held. Broadcast helpers snapshot recipients first, then send.
pub struct Room {
    slug: String,
    created_at: DateTime<Utc>,
    state: RwLock<RoomState>,
}

#[derive(Default)]
struct RoomState {
    host: Option<Arc<Participant>>,
    guests: HashMap<String, Arc<Participant>>,
    public_keys: HashMap<String, String>,
    tracks: Vec<Arc<RelayTrack>>,
}

impl RoomState {
    fn contains(&self, id: &str) -> bool {
        self.host.as_ref().is_some_and(|h| h.id().as_str() == id) || self.guests.contains_key(id)
    }

    fn lookup(&self, id: &str) -> Option<&Arc<Participant>> {
        self.host
            .as_ref()
            .filter(|h| h.id().as_str() == id)
            .or_else(|| self.guests.get(id))
    }

    fn len(&self) -> usize {
        usize::from(self.host.is_some()) + self.guests.len()
    }

    fn members(&self) -> Vec<Arc<Participant>> {
        self.host.iter().chain(self.guests.values()).cloned().collect()
    }

    fn remove(&mut self, id: &str) -> Option<Removal> {
        let participant = if self.host.as_ref().is_some_and(|h| h.id().as_str() == id) {
            self.host.take()?
        } else {
            self.guests.remove(id)?
        };

        let had_public_key = self.public_keys.remove(id).is_some();
        let (tracks, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|t| t.publisher().as_str() == id);
        self.tracks = kept;

        Some(Removal {
            participant,
            tracks,
            had_public_key,
        })
    }
}

/// Result of admitting a participant
#[derive(Debug)]
pub struct Admission {
    pub role: Role,
    pub status: ParticipantStatus,
    /// Asked to be host but the slot was taken
    pub demoted: bool,
    /// Tracks published before the participant arrived
    pub existing_tracks: Vec<Arc<RelayTrack>>,
    /// Host at admission time, to notify of a knock
    pub host: Option<Arc<Participant>>,
}

/// What a removal took out of the room
#[derive(Debug)]
pub struct Removal {
    pub participant: Arc<Participant>,
    /// The participant's tracks, dropped from the room's track list
    pub tracks: Vec<Arc<RelayTrack>>,
    pub had_public_key: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub has_host: bool,
    pub guests_count: usize,
    pub participants: ParticipantsData,
    pub tracks: Vec<TrackStats>,
}

impl Room {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            created_at: Utc::now(),
            state: RwLock::new(RoomState::default()),
        }
    }

    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Admit a participant.
    ///
    /// A participant asking for the host role gets it only while the slot is
    /// free; otherwise it becomes a knocking guest. Without an explicit role
    /// the first participant of an empty room becomes host.
    pub fn add_participant(
        &self,
        participant: Arc<Participant>,
        max_participants: usize,
    ) -> Result<Admission> {
        let mut state = self.state.write();
        let id = participant.id().as_str().to_string();

        if state.contains(&id) {
            return Err(Error::DuplicateParticipant(id));
        }
        if max_participants > 0 && state.len() >= max_participants {
            return Err(Error::RoomFull(self.slug.clone()));
        }

        let (role, demoted) = match participant.requested_role() {
            Some(Role::Host) if state.host.is_none() => (Role::Host, false),
            Some(Role::Host) => (Role::Guest, true),
            Some(Role::Guest) => (Role::Guest, false),
            None if state.len() == 0 => (Role::Host, false),
            None => (Role::Guest, false),
        };

        let status = match role {
            Role::Host => {
                participant.set_admission(Role::Host, ParticipantStatus::InRoom);
                state.host = Some(Arc::clone(&participant));
                ParticipantStatus::InRoom
            }
            Role::Guest => {
                participant.set_admission(Role::Guest, ParticipantStatus::Knocking);
                state.guests.insert(id, Arc::clone(&participant));
                ParticipantStatus::Knocking
            }
        };

        Ok(Admission {
            role,
            status,
            demoted,
            existing_tracks: state.tracks.clone(),
            host: if role == Role::Guest {
                state.host.clone()
            } else {
                None
            },
        })
    }

    /// Remove by ID. Removing an absent participant is a no-op.
    pub fn remove_participant(&self, id: &str) -> Option<Removal> {
        self.state.write().remove(id)
    }

    /// Remove this exact participant, not a later one reusing its ID
    pub fn remove_member(&self, participant: &Arc<Participant>) -> Option<Removal> {
        let mut state = self.state.write();
        let id = participant.id().as_str();
        let same = state
            .lookup(id)
            .is_some_and(|current| Arc::ptr_eq(current, participant));
        if same {
            state.remove(id)
        } else {
            None
        }
    }

    /// Knocking → InRoom. Returns the admitted guest, or `None` if there was
    /// no knocking guest with that ID.
    pub fn allow_guest(&self, id: &str) -> Option<Arc<Participant>> {
        let state = self.state.write();
        let guest = state.guests.get(id)?;
        if guest.status() != ParticipantStatus::Knocking {
            return None;
        }
        guest.set_status(ParticipantStatus::InRoom);
        Some(Arc::clone(guest))
    }

    /// Remove a knocking guest. Guests already in the room are left alone.
    pub fn deny_guest(&self, id: &str) -> Option<Removal> {
        let mut state = self.state.write();
        if state.guests.get(id)?.status() != ParticipantStatus::Knocking {
            return None;
        }
        state.remove(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().len() == 0
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.state.read().len()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Participant>> {
        self.state.read().lookup(id).cloned()
    }

    #[must_use]
    pub fn host(&self) -> Option<Arc<Participant>> {
        self.state.read().host.clone()
    }

    #[must_use]
    pub fn members(&self) -> Vec<Arc<Participant>> {
        self.state.read().members()
    }

    /// Store a participant's public key, replacing any previous one.
    ///
    /// Returns `Ok(false)` if the participant is no longer a member.
    pub fn save_public_key(&self, id: &str, key: &str) -> Result<bool> {
        let key = validate_public_key(key)?;
        let mut state = self.state.write();
        if !state.contains(id) {
            return Ok(false);
        }
        state.public_keys.insert(id.to_string(), key);
        Ok(true)
    }

    pub fn remove_public_key(&self, id: &str) -> bool {
        self.state.write().public_keys.remove(id).is_some()
    }

    #[must_use]
    pub fn public_keys(&self) -> BTreeMap<String, String> {
        self.state
            .read()
            .public_keys
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Append a track and return the members that must subscribe to it.
    ///
    /// `None` when the publisher already left; the track is not recorded.
    pub fn publish_track(&self, track: Arc<RelayTrack>) -> Option<Vec<Arc<Participant>>> {
        let mut state = self.state.write();
        let publisher = track.publisher().as_str().to_string();
        if !state.contains(&publisher) {
            return None;
        }
        state.tracks.push(track);
        Some(
            state
                .members()
                .into_iter()
                .filter(|p| p.id().as_str() != publisher)
                .collect(),
        )
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<Arc<RelayTrack>> {
        self.state.read().tracks.clone()
    }

    #[must_use]
    pub fn participants_data(&self) -> ParticipantsData {
        let state = self.state.read();
        ParticipantsData {
            host: state.host.as_ref().map(|h| h.info()),
            guests: state
                .guests
                .iter()
                .map(|(id, p)| (id.clone(), p.info()))
                .collect(),
            count: state.guests.len(),
        }
    }

    fn deliver(&self, recipients: Vec<Arc<Participant>>, message: &Message) -> usize {
        let message = message.clone().with_room(self.slug.clone());
        let mut delivered = 0;
        for participant in recipients {
            match participant.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    room = %self.slug,
                    participant = %participant.id(),
                    kind = %message.kind(),
                    error = %e,
                    "Dropped outbound message"
                ),
            }
        }
        delivered
    }

    /// Send to every member except `exclude`. Returns how many were queued.
    pub fn broadcast(&self, message: &Message, exclude: Option<&str>) -> usize {
        let recipients = self
            .members()
            .into_iter()
            .filter(|p| Some(p.id().as_str()) != exclude)
            .collect();
        self.deliver(recipients, message)
    }

    /// Send to every admitted member except `exclude`
    pub fn broadcast_in_room(&self, message: &Message, exclude: Option<&str>) -> usize {
        let recipients = self
            .members()
            .into_iter()
            .filter(|p| p.is_in_room() && Some(p.id().as_str()) != exclude)
            .collect();
        self.deliver(recipients, message)
    }

    /// Send to one member
    pub fn send_to(&self, participant: &Arc<Participant>, message: &Message) -> bool {
        self.deliver(vec![Arc::clone(participant)], message) == 1
    }

    pub fn broadcast_participants(&self) -> usize {
        let message = Message::new(Payload::Participants(self.participants_data()));
        self.broadcast(&message, None)
    }

    pub fn broadcast_public_keys(&self, exclude: Option<&str>) -> usize {
        let message = Message::new(Payload::PublicKeys(PublicKeysData {
            keys: self.public_keys(),
        }));
        self.broadcast(&message, exclude)
    }

    #[must_use]
    pub fn stats(&self) -> RoomStats {
        let (has_host, guests_count, tracks) = {
            let state = self.state.read();
            (
                state.host.is_some(),
                state.guests.len(),
                state.tracks.iter().map(|t| t.stats()).collect(),
            )
        };
        RoomStats {
            slug: self.slug.clone(),
            created_at: self.created_at,
            has_host,
            guests_count,
            participants: self.participants_data(),
            tracks,
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("slug", &self.slug)
            .field("participants", &self.participant_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{self, OutboundReceiver};
    use crate::protocol::MessageKind;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    fn participant(id: &str, role: Option<Role>) -> (Arc<Participant>, OutboundReceiver) {
        let (conn, rx) = connection::channel(16);
        (Arc::new(Participant::new(id, None, role, conn)), rx)
    }

    fn key() -> String {
        STANDARD.encode([1u8; 32])
    }

    fn assert_invariants(room: &Room) {
        if let Some(host) = room.host() {
            assert_eq!(host.role(), Role::Host);
        }
        let data = room.participants_data();
        for (id, info) in &data.guests {
            assert_eq!(id, &info.id);
            assert_eq!(info.role, Role::Guest);
        }
        assert_eq!(data.count, data.guests.len());
    }

    #[test]
    fn test_first_joiner_becomes_host() {
        let room = Room::new("r1");
        let (host, _h) = participant("h", None);
        let (guest, _g) = participant("g1", None);

        let admission = room.add_participant(Arc::clone(&host), 0).unwrap();
        assert_eq!(admission.role, Role::Host);
        assert_eq!(admission.status, ParticipantStatus::InRoom);
        assert!(admission.host.is_none());

        let admission = room.add_participant(Arc::clone(&guest), 0).unwrap();
        assert_eq!(admission.role, Role::Guest);
        assert_eq!(admission.status, ParticipantStatus::Knocking);
        assert_eq!(admission.host.unwrap().id().as_str(), "h");
        assert_eq!(guest.status(), ParticipantStatus::Knocking);
        assert_invariants(&room);
    }

    #[test]
    fn test_second_host_is_demoted() {
        let room = Room::new("r1");
        let (host, _h) = participant("h1", Some(Role::Host));
        let (usurper, _u) = participant("h2", Some(Role::Host));

        room.add_participant(host, 0).unwrap();
        let admission = room.add_participant(Arc::clone(&usurper), 0).unwrap();
        assert!(admission.demoted);
        assert_eq!(admission.role, Role::Guest);
        assert_eq!(usurper.status(), ParticipantStatus::Knocking);
        assert_eq!(room.host().unwrap().id().as_str(), "h1");
        assert_invariants(&room);
    }

    #[test]
    fn test_explicit_guest_in_empty_room() {
        let room = Room::new("r1");
        let (guest, _g) = participant("g1", Some(Role::Guest));
        let admission = room.add_participant(guest, 0).unwrap();
        assert_eq!(admission.role, Role::Guest);
        assert!(room.host().is_none());
    }

    #[test]
    fn test_duplicate_and_full() {
        let room = Room::new("r1");
        let (a, _a) = participant("a", None);
        let (a2, _a2) = participant("a", None);
        let (b, _b) = participant("b", None);

        room.add_participant(a, 1).unwrap();
        assert!(matches!(
            room.add_participant(a2, 0),
            Err(Error::DuplicateParticipant(_))
        ));
        assert!(matches!(room.add_participant(b, 1), Err(Error::RoomFull(_))));
        assert_eq!(room.participant_count(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let room = Room::new("r1");
        let (host, _h) = participant("h", None);
        let (guest, _g) = participant("g1", None);
        room.add_participant(host, 0).unwrap();
        room.add_participant(guest, 0).unwrap();
        room.save_public_key("g1", &key()).unwrap();

        let removal = room.remove_participant("g1").unwrap();
        assert!(removal.had_public_key);
        assert!(room.remove_participant("g1").is_none());
        assert!(room.public_keys().is_empty());
        assert_eq!(room.participant_count(), 1);

        room.remove_participant("h");
        assert!(room.is_empty());
    }

    #[test]
    fn test_remove_member_ignores_reused_id() {
        let room = Room::new("r1");
        let (old, _o) = participant("p", None);
        let (new, _n) = participant("p", None);
        room.add_participant(Arc::clone(&old), 0).unwrap();
        room.remove_member(&old).unwrap();
        room.add_participant(Arc::clone(&new), 0).unwrap();

        assert!(room.remove_member(&old).is_none());
        assert!(room.get("p").is_some());
    }

    #[test]
    fn test_allow_and_deny_only_touch_knocking_guests() {
        let room = Room::new("r1");
        let (host, _h) = participant("h", None);
        let (g1, _g1) = participant("g1", None);
        let (g2, _g2) = participant("g2", None);
        room.add_participant(host, 0).unwrap();
        room.add_participant(Arc::clone(&g1), 0).unwrap();
        room.add_participant(g2, 0).unwrap();

        assert!(room.allow_guest("g1").is_some());
        assert_eq!(g1.status(), ParticipantStatus::InRoom);
        assert!(room.allow_guest("g1").is_none());
        assert!(room.deny_guest("g1").is_none());
        assert!(room.get("g1").is_some());

        assert!(room.allow_guest("nobody").is_none());
        assert!(room.deny_guest("h").is_none());

        let removal = room.deny_guest("g2").unwrap();
        assert_eq!(removal.participant.id().as_str(), "g2");
        assert!(room.get("g2").is_none());
        assert_invariants(&room);
    }

    #[test]
    fn test_public_keys() {
        let room = Room::new("r1");
        let (host, _h) = participant("h", None);
        room.add_participant(host, 0).unwrap();

        assert!(matches!(
            room.save_public_key("h", ""),
            Err(Error::InvalidPublicKey(_))
        ));
        assert!(room.save_public_key("h", &key()).unwrap());
        let newer = STANDARD.encode([2u8; 32]);
        assert!(room.save_public_key("h", &newer).unwrap());
        assert_eq!(room.public_keys().get("h"), Some(&newer));

        assert!(!room.save_public_key("stranger", &key()).unwrap());
        assert!(room.remove_public_key("h"));
        assert!(!room.remove_public_key("h"));
    }

    #[test]
    fn test_broadcast_snapshots_and_filters() {
        let room = Room::new("r1");
        let (host, mut host_rx) = participant("h", None);
        let (g1, mut g1_rx) = participant("g1", None);
        let (g2, mut g2_rx) = participant("g2", None);
        room.add_participant(host, 0).unwrap();
        room.add_participant(g1, 0).unwrap();
        room.add_participant(g2, 0).unwrap();
        room.allow_guest("g1");

        let msg = Message::new(Payload::Knock);
        assert_eq!(room.broadcast(&msg, Some("h")), 2);
        assert!(host_rx.try_recv().is_none());
        assert_eq!(g1_rx.try_recv().unwrap().room_id.as_deref(), Some("r1"));
        assert!(g2_rx.try_recv().is_some());

        assert_eq!(room.broadcast_in_room(&msg, Some("h")), 1);
        assert!(g1_rx.try_recv().is_some());
        assert!(g2_rx.try_recv().is_none());

        room.broadcast_participants();
        let participants = host_rx.try_recv().unwrap();
        assert_eq!(participants.kind(), MessageKind::Participants);
        let Payload::Participants(data) = participants.payload else {
            panic!("expected participants");
        };
        assert_eq!(data.count, 2);
    }

    #[test]
    fn test_stats() {
        let room = Room::new("r1");
        let (host, _h) = participant("h", None);
        room.add_participant(host, 0).unwrap();
        let stats = room.stats();
        assert_eq!(stats.slug, "r1");
        assert!(stats.has_host);
        assert_eq!(stats.guests_count, 0);
        assert!(stats.tracks.is_empty());
    }
}
