use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::models::{Admission, Participant, Removal, Room};
use crate::{Error, Result};

/// Process-wide mapping from slug to room.
///
/// Rooms are created by the first admission and removed in the same critical
/// section that removes their last participant. Lock order is registry, then
/// room.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    max_rooms: usize,
    max_participants_per_room: usize,
}

/// Outcome of a participant leaving
#[derive(Debug)]
pub struct Departure {
    pub room: Arc<Room>,
    /// `None` when the participant had already been removed (e.g. denied)
    pub removal: Option<Removal>,
    pub room_deleted: bool,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(max_rooms: usize, max_participants_per_room: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_rooms,
            max_participants_per_room,
        }
    }

    /// Get or create the room and add the participant, atomically
    pub fn admit(&self, slug: &str, participant: Arc<Participant>) -> Result<(Arc<Room>, Admission)> {
        let mut rooms = self.rooms.write();

        let created = !rooms.contains_key(slug);
        if created && self.max_rooms > 0 && rooms.len() >= self.max_rooms {
            return Err(Error::TooManyRooms);
        }

        let room = Arc::clone(
            rooms
                .entry(slug.to_string())
                .or_insert_with(|| Arc::new(Room::new(slug))),
        );

        match room.add_participant(participant, self.max_participants_per_room) {
            Ok(admission) => {
                if created {
                    info!(room = %slug, "Room created");
                }
                Ok((room, admission))
            }
            Err(e) => {
                if created {
                    rooms.remove(slug);
                }
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn get(&self, slug: &str) -> Option<Arc<Room>> {
        self.rooms.read().get(slug).cloned()
    }

    #[must_use]
    pub fn contains(&self, slug: &str) -> bool {
        self.rooms.read().contains_key(slug)
    }

    /// Remove the participant and, if the room is left empty, the room
    pub fn depart(&self, slug: &str, participant: &Arc<Participant>) -> Option<Departure> {
        let mut rooms = self.rooms.write();
        let room = Arc::clone(rooms.get(slug)?);
        let removal = room.remove_member(participant);

        let room_deleted = room.is_empty();
        if room_deleted {
            rooms.remove(slug);
            info!(room = %slug, "Room deleted (empty)");
        }

        Some(Departure {
            room,
            removal,
            room_deleted,
        })
    }

    /// Drop `room` from the registry if it is still registered and empty
    pub fn remove_if_empty(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write();
        let registered = rooms
            .get(room.slug())
            .is_some_and(|current| Arc::ptr_eq(current, room));
        if registered && room.is_empty() {
            rooms.remove(room.slug());
            info!(room = %room.slug(), "Room deleted (empty)");
            true
        } else {
            false
        }
    }

    /// Rooms registered right now
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Room>> {
        self.rooms.read().values().cloned().collect()
    }

    /// Empty the registry, returning every room it held
    pub fn drain(&self) -> Vec<Arc<Room>> {
        self.rooms.write().drain().map(|(_, room)| room).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }
}
