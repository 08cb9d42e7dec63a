use chrono::{DateTime, Utc};
use huddle_sfu::{PeerId, PeerSession, RelayTrack};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::connection::ConnectionHandle;
use crate::protocol::{Message, ParticipantInfo, ParticipantStatus, Role};
use crate::Result;

/// Peer session lifecycle of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Initializing,
    Active,
    Closed,
}

enum SessionSlot {
    NoSession,
    Initializing,
    Active(Arc<dyn PeerSession>),
    Closed,
}

struct Admission {
    role: Role,
    status: ParticipantStatus,
}

/// One connected client
pub struct Participant {
    id: PeerId,
    name: Option<String>,
    requested_role: Option<Role>,
    joined_at: DateTime<Utc>,
    connection: ConnectionHandle,
    admission: RwLock<Admission>,
    session: RwLock<SessionSlot>,
    published_tracks: RwLock<Vec<Arc<RelayTrack>>>,
    /// Serializes offer/answer sequences on the session
    negotiation: Mutex<()>,
    renegotiation_pending: AtomicBool,
}

impl Participant {
    pub fn new(
        id: impl Into<PeerId>,
        name: Option<String>,
        requested_role: Option<Role>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            id: id.into(),
            name,
            requested_role,
            joined_at: Utc::now(),
            connection,
            admission: RwLock::new(Admission {
                role: Role::Guest,
                status: ParticipantStatus::Connected,
            }),
            session: RwLock::new(SessionSlot::NoSession),
            published_tracks: RwLock::new(Vec::new()),
            negotiation: Mutex::new(()),
            renegotiation_pending: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub const fn requested_role(&self) -> Option<Role> {
        self.requested_role
    }

    #[must_use]
    pub const fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.admission.read().role
    }

    #[must_use]
    pub fn status(&self) -> ParticipantStatus {
        self.admission.read().status
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    #[must_use]
    pub fn is_in_room(&self) -> bool {
        self.status() == ParticipantStatus::InRoom
    }

    pub(crate) fn set_admission(&self, role: Role, status: ParticipantStatus) {
        let mut admission = self.admission.write();
        admission.role = role;
        admission.status = status;
    }

    pub(crate) fn set_status(&self, status: ParticipantStatus) {
        self.admission.write().status = status;
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.connection.send(message)
    }

    #[must_use]
    pub fn info(&self) -> ParticipantInfo {
        let admission = self.admission.read();
        ParticipantInfo {
            id: self.id.as_str().to_string(),
            name: self.name.clone(),
            role: admission.role,
            status: admission.status,
            joined_at: self.joined_at,
        }
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        match &*self.session.read() {
            SessionSlot::NoSession => SessionState::NoSession,
            SessionSlot::Initializing => SessionState::Initializing,
            SessionSlot::Active(_) => SessionState::Active,
            SessionSlot::Closed => SessionState::Closed,
        }
    }

    /// The active session, if any
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn PeerSession>> {
        match &*self.session.read() {
            SessionSlot::Active(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// NoSession → Initializing. False if a session already exists or was closed.
    pub(crate) fn begin_session(&self) -> bool {
        let mut slot = self.session.write();
        if matches!(*slot, SessionSlot::NoSession) {
            *slot = SessionSlot::Initializing;
            true
        } else {
            false
        }
    }

    /// Initializing → Active. Hands the session back if the participant is no
    /// longer waiting for one.
    pub(crate) fn activate_session(
        &self,
        session: Arc<dyn PeerSession>,
    ) -> std::result::Result<(), Arc<dyn PeerSession>> {
        let mut slot = self.session.write();
        if matches!(*slot, SessionSlot::Initializing) {
            *slot = SessionSlot::Active(session);
            Ok(())
        } else {
            Err(session)
        }
    }

    /// Move to Closed and return the session that must be closed, if any
    pub(crate) fn take_session(&self) -> Option<Arc<dyn PeerSession>> {
        match std::mem::replace(&mut *self.session.write(), SessionSlot::Closed) {
            SessionSlot::Active(session) => Some(session),
            _ => None,
        }
    }

    #[must_use]
    pub fn published_tracks(&self) -> Vec<Arc<RelayTrack>> {
        self.published_tracks.read().clone()
    }

    pub(crate) fn add_published_track(&self, track: Arc<RelayTrack>) {
        self.published_tracks.write().push(track);
    }

    pub(crate) async fn lock_negotiation(&self) -> MutexGuard<'_, ()> {
        self.negotiation.lock().await
    }

    pub(crate) fn mark_renegotiation_pending(&self) {
        self.renegotiation_pending.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_renegotiation_pending(&self) -> bool {
        self.renegotiation_pending.swap(false, Ordering::SeqCst)
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let admission = self.admission.read();
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("role", &admission.role)
            .field("status", &admission.status)
            .field("session", &self.session_state())
            .finish_non_exhaustive()
    }
}
