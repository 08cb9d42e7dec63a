use std::sync::Arc;
use tracing::{debug, info};

use super::SignalingServer;
use crate::models::{Participant, Room};
use crate::protocol::{EncryptedData, Message, Payload, BROADCAST_TARGET};

impl SignalingServer {
    /// Route one inbound message from `participant`.
    ///
    /// Dropped silently when the room no longer exists or no longer holds this
    /// participant. Unauthorized senders are ignored without a reply.
    pub async fn dispatch(&self, slug: &str, participant: &Arc<Participant>, message: Message) {
        let Some(room) = self.registry.get(slug) else {
            debug!(room = %slug, kind = %message.kind(), "Room is gone, dropping message");
            return;
        };
        let is_member = room
            .get(participant.id().as_str())
            .is_some_and(|current| Arc::ptr_eq(&current, participant));
        if !is_member {
            debug!(room = %slug, participant = %participant.id(), "Sender is not a member, dropping message");
            return;
        }

        let timestamp = message.timestamp;
        match message.payload {
            Payload::Allow(guest_id) => handle_allow(&room, participant, &guest_id),
            Payload::Deny(guest_id) => self.handle_deny(&room, participant, &guest_id).await,
            payload @ (Payload::Offer(_) | Payload::Answer(_) | Payload::IceCandidate(_)) => {
                self.orchestrator.handle_signal(&room, participant, payload).await;
            }
            Payload::KeyExchange(data) => handle_key_exchange(&room, participant, &data.public_key),
            Payload::EncryptedData(data) => {
                handle_encrypted_data(&room, participant, data, timestamp);
            }
            other => {
                debug!(
                    room = %slug,
                    participant = %participant.id(),
                    kind = %other.kind(),
                    "Unhandled message type"
                );
            }
        }
    }

    async fn handle_deny(&self, room: &Arc<Room>, participant: &Arc<Participant>, guest_id: &str) {
        if !participant.is_host() {
            debug!(participant = %participant.id(), "Non-host deny ignored");
            return;
        }
        let Some(removal) = room.deny_guest(guest_id) else {
            debug!(room = %room.slug(), guest = %guest_id, "No knocking guest to deny");
            return;
        };

        let guest = &removal.participant;
        room.send_to(
            guest,
            &Message::new(Payload::Deny(guest_id.to_string())).with_from(participant.id().as_str()),
        );
        guest.connection().close();
        info!(room = %room.slug(), guest = %guest_id, "Guest denied");

        room.broadcast_participants();
        if removal.had_public_key {
            room.broadcast_public_keys(None);
        }
        self.registry.remove_if_empty(room);

        self.orchestrator.close_session(guest).await;
        self.orchestrator.detach_tracks(room, &removal.tracks).await;
    }
}

fn handle_allow(room: &Room, participant: &Participant, guest_id: &str) {
    if !participant.is_host() {
        debug!(participant = %participant.id(), "Non-host allow ignored");
        return;
    }
    let Some(guest) = room.allow_guest(guest_id) else {
        debug!(room = %room.slug(), guest = %guest_id, "No knocking guest to allow");
        return;
    };

    room.send_to(
        &guest,
        &Message::new(Payload::Allow(guest_id.to_string())).with_from(participant.id().as_str()),
    );
    room.broadcast_participants();
    info!(room = %room.slug(), guest = %guest_id, "Guest admitted");
}

fn handle_key_exchange(room: &Room, participant: &Arc<Participant>, public_key: &str) {
    let id = participant.id().as_str();
    match room.save_public_key(id, public_key) {
        Ok(true) => {
            debug!(room = %room.slug(), participant = %id, "Public key stored");
            room.broadcast_public_keys(None);
        }
        Ok(false) => {}
        Err(e) => {
            debug!(room = %room.slug(), participant = %id, error = %e, "Rejected public key");
            room.send_to(participant, &Message::error(e.code(), e.to_string()));
        }
    }
}

fn handle_encrypted_data(
    room: &Room,
    participant: &Participant,
    data: EncryptedData,
    timestamp: chrono::DateTime<chrono::Utc>,
) {
    if !participant.is_in_room() {
        debug!(participant = %participant.id(), "Encrypted data from non-admitted participant ignored");
        return;
    }

    let sender = participant.id().as_str();
    let target = data.to.clone();
    let mut message = Message::new(Payload::EncryptedData(data))
        .with_from(sender)
        .with_to(target.as_str());
    message.timestamp = timestamp;

    if target == BROADCAST_TARGET {
        room.broadcast_in_room(&message, Some(sender));
        return;
    }

    match room.get(&target) {
        Some(recipient) if recipient.is_in_room() && recipient.id().as_str() != sender => {
            room.send_to(&recipient, &message);
        }
        _ => debug!(room = %room.slug(), to = %target, "No admitted recipient for encrypted data"),
    }
}
