use anyhow::{anyhow, Result};
use async_trait::async_trait;
use huddle_sfu::{
    CodecCapability, IceCandidate, PeerId, PeerSession, RelayTrack, RemoteTrackSource, RtpPacket,
    SdpType, SessionDescription, SessionEvent, SessionEvents, SessionFactory, TrackId, TrackKind,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SignalingServer;
use crate::config::SignalingConfig;
use crate::connection::memory::{self, MemorySender};
use crate::connection::{self, ConnectionHandle, OutboundReceiver};
use crate::protocol::{Message, MessageKind};

#[derive(Default)]
struct MockState {
    local_offer_pending: bool,
    tracks: Vec<TrackId>,
    candidates: Vec<IceCandidate>,
    closed: bool,
}

/// Scripted peer session: any SDP is accepted except the literal "bad"
#[derive(Default)]
pub struct MockSession {
    state: Mutex<MockState>,
    offers: AtomicUsize,
}

impl MockSession {
    pub fn tracks(&self) -> Vec<TrackId> {
        self.state.lock().tracks.clone()
    }

    pub fn candidates(&self) -> usize {
        self.state.lock().candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerSession for MockSession {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp == "bad" {
            return Err(anyhow!("unparsable SDP"));
        }
        if desc.sdp_type == SdpType::Answer {
            self.state.lock().local_offer_pending = false;
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("mock-answer"))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("mock-offer-{n}")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.state.lock().local_offer_pending = desc.sdp_type == SdpType::Offer;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.sdp_mid.is_none() && candidate.sdp_mline_index.is_none() {
            return Err(anyhow!("candidate without mid or line index"));
        }
        self.state.lock().candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<()> {
        let mut state = self.state.lock();
        if !state.tracks.contains(track.id()) {
            state.tracks.push(track.id().clone());
        }
        Ok(())
    }

    async fn remove_track(&self, track_id: &TrackId) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.tracks.len();
        state.tracks.retain(|t| t != track_id);
        Ok(state.tracks.len() != before)
    }

    async fn ready_for_offer(&self) -> bool {
        !self.state.lock().local_offer_pending
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Factory keeping every session it made, addressable by peer ID
#[derive(Default)]
pub struct MockSessionFactory {
    sessions: Mutex<HashMap<PeerId, (Arc<MockSession>, mpsc::UnboundedSender<SessionEvent>)>>,
    fail: AtomicBool,
}

impl MockSessionFactory {
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn session(&self, id: &str) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[&PeerId::from(id)].0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn emit(&self, id: &str, event: SessionEvent) {
        let tx = self.sessions.lock()[&PeerId::from(id)].1.clone();
        tx.send(event).unwrap();
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create_session(&self, peer_id: &PeerId) -> Result<(Arc<dyn PeerSession>, SessionEvents)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("engine unavailable"));
        }
        let session = Arc::new(MockSession::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .insert(peer_id.clone(), (Arc::clone(&session), tx));
        Ok((session, rx))
    }
}

/// Remote track that yields no packets until ended
pub struct FakeRemoteTrack {
    id: String,
    ended: CancellationToken,
}

impl FakeRemoteTrack {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            ended: CancellationToken::new(),
        })
    }

    pub fn end(&self) {
        self.ended.cancel();
    }
}

#[async_trait]
impl RemoteTrackSource for FakeRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        "stream".to_string()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn codec(&self) -> CodecCapability {
        CodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        }
    }

    async fn read_rtp(&self) -> Result<RtpPacket> {
        self.ended.cancelled().await;
        Err(anyhow!("track ended"))
    }
}

pub fn server_with(config: SignalingConfig) -> (Arc<SignalingServer>, Arc<MockSessionFactory>) {
    let factory = Arc::new(MockSessionFactory::default());
    let server = SignalingServer::new(config, Arc::clone(&factory) as Arc<dyn SessionFactory>);
    (server, factory)
}

pub fn server() -> (Arc<SignalingServer>, Arc<MockSessionFactory>) {
    server_with(SignalingConfig::default())
}

/// A client connected through the in-memory transport
pub struct TestClient {
    sender: Option<MemorySender>,
    outbound: OutboundReceiver,
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

const WAIT: Duration = Duration::from_secs(2);

impl TestClient {
    /// Connect and send `join` as the first frame, without waiting for the ack
    pub fn connect_raw(server: &Arc<SignalingServer>, slug: &str, first_frame: &str) -> Self {
        let (handle, outbound) = connection::channel(64);
        let (sender, stream) = memory::pair();
        sender.send_text(first_frame);

        let server = Arc::clone(server);
        let slug = slug.to_string();
        let conn = handle.clone();
        let task = tokio::spawn(async move {
            server.serve_connection(&slug, conn, stream).await;
        });

        Self {
            sender: Some(sender),
            outbound,
            handle,
            task,
        }
    }

    /// Join `slug` with the given join payload and wait for the ack
    pub async fn join(server: &Arc<SignalingServer>, slug: &str, data: serde_json::Value) -> Self {
        let frame = serde_json::json!({"type": "join", "data": data}).to_string();
        let mut client = Self::connect_raw(server, slug, &frame);
        client.expect(MessageKind::Join).await;
        client
    }

    pub fn send(&self, frame: serde_json::Value) {
        if let Some(sender) = &self.sender {
            sender.send_text(frame.to_string());
        }
    }

    pub async fn next(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait for the next message of `kind`, skipping others
    pub async fn expect(&mut self, kind: MessageKind) -> Message {
        loop {
            let message = self
                .next()
                .await
                .unwrap_or_else(|| panic!("expected {kind} message"));
            if message.kind() == kind {
                return message;
            }
        }
    }

    /// Discard everything queued so far
    pub fn clear(&mut self) {
        self.outbound.drain();
    }

    /// Messages of `kind` currently queued
    pub fn queued(&mut self, kind: MessageKind) -> Vec<Message> {
        self.outbound
            .drain()
            .into_iter()
            .filter(|m| m.kind() == kind)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Drop the client side and wait for the server to finish the connection
    pub async fn disconnect(mut self) {
        self.sender.take();
        self.finished().await;
    }

    pub async fn finished(&mut self) {
        tokio::time::timeout(WAIT, &mut self.task)
            .await
            .expect("connection task did not finish")
            .unwrap();
    }

    pub fn task_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Let spawned connection tasks run until they go idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
