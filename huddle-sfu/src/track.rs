//! Relay tracks and packet forwarding
//!
//! A publisher's remote track is mirrored by one [`RelayTrack`]. A forwarding
//! task copies RTP packets from the remote track into the relay track; every
//! subscriber session the relay track is attached to receives the packets
//! unmodified.

use crate::types::{PeerId, TrackId};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::util::marshal::MarshalSize;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// A media stream published by a remote peer
#[async_trait]
pub trait RemoteTrackSource: Send + Sync {
    fn id(&self) -> String;

    fn stream_id(&self) -> String;

    fn kind(&self) -> TrackKind;

    fn codec(&self) -> RTCRtpCodecCapability;

    /// Read the next RTP packet. An error means the stream is over.
    async fn read_rtp(&self) -> Result<Packet>;
}

/// Server-held track mirroring one publisher's remote track
pub struct RelayTrack {
    id: TrackId,
    publisher: PeerId,
    kind: TrackKind,
    local: Arc<TrackLocalStaticRTP>,
    stats: TrackStatsInner,
}

#[derive(Default)]
struct TrackStatsInner {
    packets_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    write_errors: AtomicU64,
}

impl RelayTrack {
    /// Create a relay track mirroring `source`'s codec and identifiers
    pub fn mirror(publisher: PeerId, source: &dyn RemoteTrackSource) -> Self {
        let remote_id = source.id();
        let codec = source.codec();
        let kind = source.kind();
        let id = TrackId::scoped(&publisher, &remote_id);

        info!(
            track = %id,
            participant = %publisher,
            kind = ?kind,
            codec = %codec.mime_type,
            "Creating relay track"
        );

        let local = Arc::new(TrackLocalStaticRTP::new(
            codec,
            remote_id,
            source.stream_id(),
        ));

        Self {
            id,
            publisher,
            kind,
            local,
            stats: TrackStatsInner::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TrackId {
        &self.id
    }

    #[must_use]
    pub const fn publisher(&self) -> &PeerId {
        &self.publisher
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Engine-facing local track, for attaching to a peer connection
    #[must_use]
    pub fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.local) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Write one packet to every bound subscriber
    pub async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        let size = packet.marshal_size() as u64;
        match self.local.write_rtp(packet).await {
            Ok(_) => {
                self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_forwarded.fetch_add(size, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Spawn the task copying packets from `source` into this track.
    ///
    /// The task ends on the first read failure; read failures are terminal and
    /// never retried. A failed write to one subscriber does not stop forwarding.
    pub fn spawn_forwarder(self: &Arc<Self>, source: Arc<dyn RemoteTrackSource>) -> JoinHandle<()> {
        let track = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let packet = match source.read_rtp().await {
                    Ok(packet) => packet,
                    Err(e) => {
                        debug!(track = %track.id, error = %e, "Remote track ended");
                        break;
                    }
                };

                if let Err(e) = track.write_rtp(&packet).await {
                    debug!(track = %track.id, error = %e, "Failed to forward RTP packet");
                }
            }

            info!(
                track = %track.id,
                packets = track.stats.packets_forwarded.load(Ordering::Relaxed),
                "Forwarder stopped"
            );
        })
    }

    #[must_use]
    pub fn stats(&self) -> TrackStats {
        TrackStats {
            track_id: self.id.as_str().to_string(),
            publisher: self.publisher.as_str().to_string(),
            kind: self.kind,
            packets_forwarded: self.stats.packets_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.stats.bytes_forwarded.load(Ordering::Relaxed),
            write_errors: self.stats.write_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RelayTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTrack")
            .field("id", &self.id)
            .field("publisher", &self.publisher)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Track statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackStats {
    pub track_id: String,
    pub publisher: String,
    pub kind: TrackKind,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub write_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct ScriptedTrack {
        packets: Mutex<VecDeque<Packet>>,
    }

    impl ScriptedTrack {
        fn with_packets(count: u16) -> Self {
            let packets = (0..count)
                .map(|seq| {
                    let mut p = Packet::default();
                    p.header.sequence_number = seq;
                    p.payload = vec![0u8; 100].into();
                    p
                })
                .collect();
            Self {
                packets: Mutex::new(packets),
            }
        }
    }

    #[async_trait]
    impl RemoteTrackSource for ScriptedTrack {
        fn id(&self) -> String {
            "cam".to_string()
        }

        fn stream_id(&self) -> String {
            "stream-1".to_string()
        }

        fn kind(&self) -> TrackKind {
            TrackKind::Video
        }

        fn codec(&self) -> RTCRtpCodecCapability {
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            }
        }

        async fn read_rtp(&self) -> Result<Packet> {
            self.packets
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("EOF"))
        }
    }

    #[test]
    fn test_track_kind_from_codec_type() {
        assert_eq!(TrackKind::from(RTPCodecType::Audio), TrackKind::Audio);
        assert_eq!(TrackKind::from(RTPCodecType::Video), TrackKind::Video);
    }

    #[tokio::test]
    async fn test_mirror_scopes_id_by_publisher() {
        let source = ScriptedTrack::with_packets(0);
        let track = RelayTrack::mirror(PeerId::from("alice"), &source);
        assert_eq!(track.id().as_str(), "alice/cam");
        assert_eq!(track.publisher().as_str(), "alice");
        assert_eq!(track.kind(), TrackKind::Video);
        assert_eq!(track.local().id(), "cam");
        assert_eq!(track.local().stream_id(), "stream-1");
    }

    #[tokio::test]
    async fn test_forwarder_stops_on_read_failure() {
        let source = Arc::new(ScriptedTrack::with_packets(5));
        let track = Arc::new(RelayTrack::mirror(PeerId::from("alice"), source.as_ref()));

        let handle = track.spawn_forwarder(source);
        handle.await.unwrap();

        let stats = track.stats();
        assert_eq!(stats.packets_forwarded, 5);
        assert!(stats.bytes_forwarded >= 500);
        assert_eq!(stats.write_errors, 0);
    }
}
