pub mod participant;
pub mod room;

pub use participant::{Participant, SessionState};
pub use room::{Admission, Removal, Room, RoomStats};
