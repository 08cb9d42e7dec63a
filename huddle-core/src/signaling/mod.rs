//! Signaling server: room registry, message dispatch, SFU orchestration and
//! the per-connection lifecycle.

mod dispatcher;
mod lifecycle;
pub mod orchestrator;
pub mod registry;

#[cfg(test)]
mod test_support;

use huddle_sfu::SessionFactory;
use std::sync::Arc;
use tracing::info;

use crate::config::SignalingConfig;
use crate::models::RoomStats;

pub use orchestrator::SfuOrchestrator;
pub use registry::{Departure, RoomRegistry};

pub struct SignalingServer {
    config: SignalingConfig,
    registry: RoomRegistry,
    orchestrator: SfuOrchestrator,
}

impl SignalingServer {
    pub fn new(config: SignalingConfig, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let registry = RoomRegistry::new(config.max_rooms, config.max_participants_per_room);
        Arc::new(Self {
            config,
            registry,
            orchestrator: SfuOrchestrator::new(factory),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SignalingConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    #[must_use]
    pub fn room_stats(&self, slug: &str) -> Option<RoomStats> {
        self.registry.get(slug).map(|room| room.stats())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    /// Participants across all rooms, knocking guests included
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.registry
            .snapshot()
            .iter()
            .map(|room| room.participant_count())
            .sum()
    }

    /// Close every connection and peer session and clear the registry
    pub async fn shutdown(&self) {
        let rooms = self.registry.drain();
        let mut participants = 0;
        for room in &rooms {
            for participant in room.members() {
                participant.connection().close();
                self.orchestrator.close_session(&participant).await;
                participants += 1;
            }
        }
        info!(rooms = rooms.len(), participants, "Signaling server shut down");
    }
}
