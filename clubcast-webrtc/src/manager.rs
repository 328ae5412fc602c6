//! Process-wide orchestration: session and room registries, ICE
//! configuration, and request dispatch for the HTTP front door.

use crate::config::WebRtcConfig;
use crate::error::{SessionError, SessionRefusal};
use crate::room::{Room, RoomApiItem};
use crate::session::{SessionApiItem, SessionParams, WebRtcSession};
use anyhow::anyhow;
use clubcast_core::path::PathManager;
use clubcast_core::storage::ObjectStorage;
use dashmap::DashMap;
use http::StatusCode;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;

/// A new-session request as produced by the HTTP front door.
#[derive(Debug, Clone)]
pub struct NewSessionRequest {
    pub remote_addr: String,
    pub path_name: String,
    pub query: String,
    pub user: String,
    pub pass: String,
    pub offer: Vec<u8>,
    pub publish: bool,
    /// Room UUID as received on the wire; validated before construction.
    pub room_id: String,
}

/// Successful answer to a new-session request.
#[derive(Debug, Clone)]
pub struct SessionAnswer {
    /// Secret the client uses for follow-up ICE submissions.
    pub secret: Uuid,
    /// Local SDP answer.
    pub answer: Vec<u8>,
}

pub type NewSessionResult = Result<SessionAnswer, SessionRefusal>;

/// Envelope forwarding a pending offer into the session's run loop.
pub(crate) struct NewSessionEnvelope {
    pub res: oneshot::Sender<NewSessionResult>,
}

/// Envelope forwarding remote candidates into the candidate apply loop.
pub(crate) struct AddCandidatesEnvelope {
    pub candidates: Vec<RTCIceCandidateInit>,
    pub res: oneshot::Sender<Result<(), SessionError>>,
}

/// Owns every session and room, and dispatches front-door requests.
pub struct WebRtcManager {
    config: Arc<WebRtcConfig>,
    api: Arc<API>,
    path_manager: Arc<dyn PathManager>,
    storage: Arc<dyn ObjectStorage>,
    ctx: CancellationToken,
    tracker: TaskTracker,
    sessions: DashMap<Uuid, Arc<WebRtcSession>>,
    sessions_by_secret: DashMap<Uuid, Arc<WebRtcSession>>,
    rooms: DashMap<Uuid, Arc<Room>>,
}

impl WebRtcManager {
    pub fn new(
        config: WebRtcConfig,
        path_manager: Arc<dyn PathManager>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<Arc<Self>, webrtc::Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let manager = Arc::new(Self {
            config: Arc::new(config),
            api: Arc::new(api),
            path_manager,
            storage,
            ctx: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sessions: DashMap::new(),
            sessions_by_secret: DashMap::new(),
            rooms: DashMap::new(),
        });

        tracing::info!(
            read_buffer_count = manager.config.read_buffer_count,
            ice_servers = manager.config.ice_servers.len(),
            "WebRTC manager initialized"
        );

        Ok(manager)
    }

    /// ICE servers for a fresh peer connection.
    pub fn generate_ice_servers(&self) -> Result<Vec<RTCIceServer>, SessionError> {
        self.config
            .ice_servers
            .iter()
            .map(|server| match (&server.username, &server.credential) {
                (Some(_), None) | (None, Some(_)) => Err(SessionError::IceServers(format!(
                    "server {:?} has a username or a credential but not both",
                    server.urls
                ))),
                (username, credential) => Ok(RTCIceServer {
                    urls: server.urls.clone(),
                    username: username.clone().unwrap_or_default(),
                    credential: credential.clone().unwrap_or_default(),
                    ..Default::default()
                }),
            })
            .collect()
    }

    /// Create (or return) the room `room_id`, with explicit names.
    pub fn create_room(&self, room_id: Uuid, club_name: &str, event_name: &str) -> Arc<Room> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| {
                Room::new(
                    room_id,
                    club_name.to_string(),
                    event_name.to_string(),
                    self.config.storage_region.clone(),
                    Arc::clone(&self.storage),
                )
            })
            .clone()
    }

    fn get_or_create_room(&self, room_id: Uuid) -> Arc<Room> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| {
                let short = room_id.simple().to_string()[..8].to_string();
                Room::new(
                    room_id,
                    format!("club-{short}"),
                    format!("event-{short}"),
                    self.config.storage_region.clone(),
                    Arc::clone(&self.storage),
                )
            })
            .clone()
    }

    pub fn find_room(&self, room_id: Uuid) -> Option<Arc<Room>> {
        self.rooms.get(&room_id).map(|r| Arc::clone(r.value()))
    }

    /// Create a session for the offer and block until it answers or refuses.
    pub async fn new_session(self: &Arc<Self>, req: NewSessionRequest) -> NewSessionResult {
        let Ok(room_id) = Uuid::parse_str(&req.room_id) else {
            let err = SessionError::InvalidRoomId(req.room_id.clone());
            return Err(SessionRefusal::of(&err, StatusCode::BAD_REQUEST));
        };

        if self.ctx.is_cancelled() {
            return Err(SessionRefusal::terminated());
        }

        let room = self.get_or_create_room(room_id);

        let session = WebRtcSession::spawn(
            Arc::clone(&self.config),
            Arc::clone(&self.api),
            SessionParams {
                remote_addr: req.remote_addr,
                path_name: req.path_name,
                query: req.query,
                user: req.user,
                pass: req.pass,
                offer: req.offer,
                publish: req.publish,
            },
            Arc::clone(&room),
            Arc::clone(&self.path_manager),
            Arc::downgrade(self),
            &self.ctx,
            self.tracker.clone(),
        );

        self.sessions.insert(session.id(), Arc::clone(&session));
        self.sessions_by_secret
            .insert(session.secret(), Arc::clone(&session));
        room.add_session(session.id(), session.secret());

        let (tx, rx) = oneshot::channel();
        session.deliver_new(NewSessionEnvelope { res: tx }).await;

        let session_ctx = session.context();
        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| Err(SessionRefusal::terminated())),
            _ = session_ctx.cancelled() => Err(SessionRefusal::terminated()),
        }
    }

    /// Route remote candidates to the session owning `secret`.
    pub async fn add_candidates(
        &self,
        secret: Uuid,
        candidates: Vec<RTCIceCandidateInit>,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions_by_secret
            .get(&secret)
            .map(|s| Arc::clone(s.value()))
            .ok_or(SessionError::NotFound)?;
        session.add_candidates(candidates).await
    }

    pub(crate) fn session_by_id(&self, id: Uuid) -> Option<Arc<WebRtcSession>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Deregister an exiting session from the registries and its room.
    pub(crate) fn close_session(&self, session: &WebRtcSession) {
        self.sessions.remove(&session.id());
        self.sessions_by_secret.remove(&session.secret());
        if let Some(room) = self.find_room(session.room_id()) {
            room.remove_session(session.id());
        }
    }

    /// Turn recording on for a room (bucket created idempotently).
    pub async fn record_room(&self, room_id: Uuid) -> anyhow::Result<()> {
        let room = self
            .find_room(room_id)
            .ok_or_else(|| anyhow!("room not found"))?;
        room.record().await?;
        Ok(())
    }

    /// Upload or discard a room's artifacts, close its sessions, and drop it.
    pub async fn cleanup_room(&self, room_id: Uuid) -> anyhow::Result<()> {
        let Some((_, room)) = self.rooms.remove(&room_id) else {
            return Err(anyhow!("room not found"));
        };
        room.cleanup(self).await;
        Ok(())
    }

    /// Snapshot of every session.
    pub async fn api_sessions(&self) -> Vec<SessionApiItem> {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|s| Arc::clone(s.value()))
            .collect();
        let mut items = Vec::with_capacity(sessions.len());
        for session in sessions {
            items.push(session.api_item().await);
        }
        items
    }

    /// Snapshot of every room.
    pub fn api_rooms(&self) -> Vec<RoomApiItem> {
        self.rooms.iter().map(|r| r.value().api_item()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Cancel every session and wait for all their tasks to exit.
    pub async fn close(&self) {
        self.ctx.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("WebRTC manager closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAUSE_AFTER_AUTH_ERROR;
    use clubcast_core::storage::MemoryStorage;
    use clubcast_core::test_helpers::{opus_audio, unsupported_video, StaticPathManager};

    fn new_manager(path_manager: StaticPathManager) -> Arc<WebRtcManager> {
        let mut config = WebRtcConfig::default();
        config.streams_dir = std::env::temp_dir().join(format!("clubcast-test-{}", Uuid::new_v4()));
        WebRtcManager::new(
            config,
            Arc::new(path_manager),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap()
    }

    fn publish_request(room_id: &str) -> NewSessionRequest {
        NewSessionRequest {
            remote_addr: "203.0.113.10:40000".to_string(),
            path_name: "mystream".to_string(),
            query: String::new(),
            user: String::new(),
            pass: String::new(),
            offer: b"v=0\r\n".to_vec(),
            publish: true,
            room_id: room_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_invalid_room_id_rejected_before_construction() {
        let manager = new_manager(StaticPathManager::new());

        let refusal = manager
            .new_session(publish_request("not-a-uuid"))
            .await
            .unwrap_err();

        assert_eq!(refusal.status, StatusCode::BAD_REQUEST);
        assert!(refusal.message.contains("invalid room id"));
        assert_eq!(manager.session_count(), 0);
        assert_eq!(manager.room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_throttled_401() {
        let manager = new_manager(StaticPathManager::with_credentials("user", "secret"));

        let mut req = publish_request(&Uuid::new_v4().to_string());
        req.user = "user".to_string();
        req.pass = "wrong".to_string();

        let start = tokio::time::Instant::now();
        let refusal = manager.new_session(req).await.unwrap_err();

        assert_eq!(refusal.status, StatusCode::UNAUTHORIZED);
        assert!(start.elapsed() >= PAUSE_AFTER_AUTH_ERROR);
    }

    #[tokio::test]
    async fn test_read_without_publisher_404() {
        let manager = new_manager(StaticPathManager::new());

        let mut req = publish_request(&Uuid::new_v4().to_string());
        req.publish = false;

        let refusal = manager.new_session(req).await.unwrap_err();
        assert_eq!(refusal.status, StatusCode::NOT_FOUND);
        assert!(refusal.message.starts_with("no one is publishing"));
    }

    #[tokio::test]
    async fn test_read_with_unsupported_codecs_400() {
        let path_manager = StaticPathManager::new();
        path_manager.publish("mystream", vec![unsupported_video()]);
        let manager = new_manager(path_manager);

        let mut req = publish_request(&Uuid::new_v4().to_string());
        req.publish = false;

        let refusal = manager.new_session(req).await.unwrap_err();
        assert_eq!(refusal.status, StatusCode::BAD_REQUEST);
        assert!(refusal
            .message
            .contains("AV1, VP9, VP8, H264, Opus, G722, G711"));
    }

    #[tokio::test]
    async fn test_session_deregistered_after_refusal() {
        let manager = new_manager(StaticPathManager::new());

        let mut req = publish_request(&Uuid::new_v4().to_string());
        req.publish = false;
        let _ = manager.new_session(req).await;

        // The run loop exits after the refusal and close_session runs.
        for _ in 0..50 {
            if manager.session_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_candidates_unknown_secret() {
        let manager = new_manager(StaticPathManager::new());
        let err = manager
            .add_candidates(Uuid::new_v4(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound));
    }

    #[tokio::test]
    async fn test_new_session_after_close_is_terminated() {
        let manager = new_manager(StaticPathManager::new());
        manager.close().await;

        let refusal = manager
            .new_session(publish_request(&Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert_eq!(refusal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(refusal.message, "terminated");
    }

    #[tokio::test]
    async fn test_bad_offer_is_400() {
        let path_manager = StaticPathManager::new();
        let manager = new_manager(path_manager);

        let mut req = publish_request(&Uuid::new_v4().to_string());
        req.offer = vec![0xff, 0xfe, 0xfd];

        let refusal = manager.new_session(req).await.unwrap_err();
        assert_eq!(refusal.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rooms_created_on_first_reference() {
        let manager = new_manager(StaticPathManager::new());
        let room_id = Uuid::new_v4();

        let mut req = publish_request(&room_id.to_string());
        req.publish = false;
        let _ = manager.new_session(req).await;

        let room = manager.find_room(room_id).unwrap();
        assert_eq!(room.id(), room_id);
        assert_eq!(manager.room_count(), 1);
    }

    #[tokio::test]
    async fn test_create_room_explicit_names() {
        let manager = new_manager(StaticPathManager::new());
        let room_id = Uuid::new_v4();

        let room = manager.create_room(room_id, "FC Barça Club ", "friday-night");
        assert_eq!(room.club_name(), "FC Barça Club ");

        // Re-creating keeps the first registration.
        let again = manager.create_room(room_id, "Other", "other");
        assert!(Arc::ptr_eq(&room, &again));
    }

    #[tokio::test]
    async fn test_record_missing_room() {
        let manager = new_manager(StaticPathManager::new());
        assert!(manager.record_room(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_ice_server_generation() {
        let manager = new_manager(StaticPathManager::new());
        let servers = manager.generate_ice_servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[tokio::test]
    async fn test_ice_server_generation_rejects_half_credentials() {
        let mut config = WebRtcConfig::default();
        config.ice_servers[0].username = Some("user".to_string());
        let manager = WebRtcManager::new(
            config,
            Arc::new(StaticPathManager::new()),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap();

        let err = manager.generate_ice_servers().unwrap_err();
        assert!(matches!(err, SessionError::IceServers(_)));
    }

    #[tokio::test]
    async fn test_cleanup_room_closes_members() {
        let path_manager = StaticPathManager::new();
        path_manager.publish("mystream", vec![opus_audio()]);
        let manager = new_manager(path_manager);
        let room_id = Uuid::new_v4();

        // This reader refuses during negotiation (junk offer reaches the
        // engine), but the room it referenced stays behind.
        let mut req = publish_request(&room_id.to_string());
        req.publish = false;
        let _ = manager.new_session(req).await;

        assert!(manager.find_room(room_id).is_some());
        manager.cleanup_room(room_id).await.unwrap();
        assert!(manager.find_room(room_id).is_none());
        assert!(manager.cleanup_room(room_id).await.is_err());
    }
}
