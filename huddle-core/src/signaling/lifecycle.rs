use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::SignalingServer;
use crate::connection::{ConnectionHandle, MessageStream, RecvError};
use crate::models::{Participant, Room};
use crate::protocol::{JoinData, Message, MessageKind, ParticipantStatus, Payload, ProtocolError};
use crate::validation::is_valid_id;
use huddle_sfu::SessionEvents;

const GENERATED_ID_LEN: usize = 16;

fn generate_participant_id() -> String {
    nanoid::nanoid!(GENERATED_ID_LEN)
}

async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Joined {
    participant: Arc<Participant>,
    room: Arc<Room>,
    events: SessionEvents,
}

impl SignalingServer {
    /// Run one client connection from join handshake to departure.
    ///
    /// The first inbound message must be a `join`; anything else closes the
    /// connection without touching any room.
    pub async fn serve_connection<S: MessageStream>(
        &self,
        slug: &str,
        connection: ConnectionHandle,
        mut stream: S,
    ) {
        let Some(joined) = self.join(slug, &connection, &mut stream).await else {
            connection.close();
            return;
        };

        let Joined {
            participant,
            room,
            events,
        } = joined;

        self.message_loop(slug, &participant, &room, events, &mut stream)
            .await;
        self.leave(slug, &participant).await;
    }

    async fn join<S: MessageStream>(
        &self,
        slug: &str,
        connection: &ConnectionHandle,
        stream: &mut S,
    ) -> Option<Joined> {
        if !is_valid_id(slug) {
            warn!(room = %slug, "Rejecting connection with invalid room ID");
            return None;
        }

        let first = tokio::select! {
            inbound = stream.recv() => inbound,
            () = connection.closed() => None,
        };
        let join = match first {
            Some(Ok(Message {
                payload: Payload::Join(join),
                ..
            })) => join,
            Some(Ok(other)) => {
                warn!(room = %slug, kind = %other.kind(), "Expected join message");
                return None;
            }
            Some(Err(e)) => {
                warn!(room = %slug, error = %e, "Failed to read join message");
                return None;
            }
            None => {
                debug!(room = %slug, "Connection closed before join");
                return None;
            }
        };

        let id = match join.user_id.filter(|id| !id.is_empty()) {
            Some(id) if is_valid_id(&id) => id,
            Some(_) => {
                warn!(room = %slug, "Rejecting join with invalid user ID");
                return None;
            }
            None => generate_participant_id(),
        };
        let name = join.name.filter(|n| is_valid_id(n));

        let participant = Arc::new(Participant::new(
            id.as_str(),
            name.clone(),
            join.role,
            connection.clone(),
        ));

        let events = match self.orchestrator.init_session(&participant).await {
            Ok(events) => events,
            Err(e) => {
                warn!(room = %slug, participant = %id, error = %e, "Failed to initialize peer session");
                return None;
            }
        };

        let (room, admission) = match self.registry.admit(slug, Arc::clone(&participant)) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(room = %slug, participant = %id, error = %e, "Join rejected");
                if let Err(send_err) =
                    participant.send(Message::error(e.code(), e.to_string()).with_room(slug))
                {
                    debug!(room = %slug, participant = %id, error = %send_err, "Join rejection not delivered");
                }
                self.orchestrator.close_session(&participant).await;
                return None;
            }
        };

        self.orchestrator
            .bootstrap(&participant, &admission.existing_tracks)
            .await;

        let ack = Message::new(Payload::Join(JoinData {
            user_id: Some(id.clone()),
            name,
            role: Some(admission.role),
        }));
        room.send_to(&participant, &ack);

        if admission.status == ParticipantStatus::Knocking {
            if let Some(host) = &admission.host {
                room.send_to(host, &Message::new(Payload::Knock).with_from(id.as_str()));
            }
        }

        info!(
            room = %slug,
            participant = %id,
            role = ?admission.role,
            status = ?admission.status,
            demoted = admission.demoted,
            "Participant joined"
        );

        Some(Joined {
            participant,
            room,
            events,
        })
    }

    async fn message_loop<S: MessageStream>(
        &self,
        slug: &str,
        participant: &Arc<Participant>,
        room: &Room,
        mut events: SessionEvents,
        stream: &mut S,
    ) {
        let idle_timeout = self.config.idle_timeout();
        let mut deadline = idle_timeout.map(|t| Instant::now() + t);
        let mut events_open = true;
        let connection = participant.connection();

        loop {
            tokio::select! {
                () = connection.closed() => {
                    debug!(room = %slug, participant = %participant.id(), "Connection closed by server");
                    break;
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.orchestrator.handle_event(room, participant, event).await,
                    None => events_open = false,
                },
                () = idle_deadline(deadline) => {
                    info!(room = %slug, participant = %participant.id(), "Idle timeout");
                    break;
                }
                inbound = stream.recv() => {
                    deadline = idle_timeout.map(|t| Instant::now() + t);
                    match inbound {
                        None => {
                            debug!(room = %slug, participant = %participant.id(), "Peer closed connection");
                            break;
                        }
                        Some(Err(RecvError::Protocol(ProtocolError::Json(e)))) => {
                            warn!(room = %slug, participant = %participant.id(), error = %e, "Undecodable frame");
                            break;
                        }
                        Some(Err(RecvError::Protocol(e))) => {
                            warn!(room = %slug, participant = %participant.id(), error = %e, "Dropping invalid message");
                        }
                        Some(Err(RecvError::Transport(e))) => {
                            debug!(room = %slug, participant = %participant.id(), error = %e, "Read failed");
                            break;
                        }
                        Some(Ok(mut message)) => {
                            if message.kind() == MessageKind::Leave {
                                debug!(room = %slug, participant = %participant.id(), "Client left");
                                break;
                            }
                            message.from = Some(participant.id().as_str().to_string());
                            message.room_id = Some(slug.to_string());
                            message.timestamp = chrono::Utc::now();
                            self.dispatch(slug, participant, message).await;
                        }
                    }
                }
            }
        }
    }

    async fn leave(&self, slug: &str, participant: &Arc<Participant>) {
        participant.set_status(ParticipantStatus::Disconnected);
        let departure = self.registry.depart(slug, participant);
        participant.connection().close();
        self.orchestrator.close_session(participant).await;

        let Some(departure) = departure else {
            return;
        };
        let Some(removal) = departure.removal else {
            return;
        };

        let id = participant.id().as_str();
        if !departure.room_deleted {
            let room = &departure.room;
            room.broadcast(&Message::new(Payload::Leave).with_from(id), Some(id));
            room.broadcast_public_keys(Some(id));
            self.orchestrator.detach_tracks(room, &removal.tracks).await;
        }

        info!(
            room = %slug,
            participant = %id,
            tracks = removal.tracks.len(),
            room_deleted = departure.room_deleted,
            "Participant left"
        );
    }
}
