//! One WebRTC session: a peer connection driven through its full lifecycle,
//! publishing into a path or reading from one.

use crate::config::{
    WebRtcConfig, HANDSHAKE_TIMEOUT, PAUSE_AFTER_AUTH_ERROR, TRACK_GATHER_TIMEOUT,
};
use crate::error::{SessionError, SessionRefusal};
use crate::manager::{
    AddCandidatesEnvelope, NewSessionEnvelope, NewSessionResult, SessionAnswer, WebRtcManager,
};
use crate::peer_connection::PeerConnection;
use crate::room::{slug, Room};
use crate::track::{
    gather_outgoing_tracks, IncomingTrack, OutgoingTrack, RecordingWriter, WriteTask,
};
use chrono::{DateTime, Utc};
use clubcast_core::media::{MediaDescriptor, MediaKind};
use clubcast_core::path::{AuthCredentials, AuthProtocol, Path, PathManager};
use clubcast_core::stream::Stream;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::api::API;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::media::io::h264_writer::H264Writer;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::media::io::Writer;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::sdp::description::media::MediaDescription;
use webrtc::sdp::description::session::SessionDescription as SdpSessionDescription;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

const OPUS_SAMPLE_RATE: u32 = 48000;
const OPUS_CHANNEL_COUNT: u8 = 2;

/// A remote track as handed over by the engine's track callback.
pub(crate) struct TrackRecvPair {
    pub track: Arc<TrackRemote>,
    pub receiver: Arc<RTCRtpReceiver>,
}

/// Inputs a session is created from.
pub(crate) struct SessionParams {
    pub remote_addr: String,
    pub path_name: String,
    pub query: String,
    pub user: String,
    pub pass: String,
    pub offer: Vec<u8>,
    pub publish: bool,
}

/// Session role reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionApiState {
    Publish,
    Read,
}

/// Session snapshot for the API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionApiItem {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub remote_addr: String,
    pub state: SessionApiState,
    pub path: String,
    pub peer_connection_established: bool,
    pub local_candidate: String,
    pub remote_candidate: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

struct MetadataFile {
    path: PathBuf,
    file: tokio::fs::File,
}

#[derive(Default)]
struct SharedState {
    pc: Option<Arc<PeerConnection>>,
}

/// One publish or read session over a peer connection.
pub struct WebRtcSession {
    config: Arc<WebRtcConfig>,
    api: Arc<API>,
    params: SessionParams,
    id: Uuid,
    secret: Uuid,
    created: DateTime<Utc>,
    room: Arc<Room>,
    ctx: CancellationToken,
    parent: Weak<WebRtcManager>,
    path_manager: Arc<dyn PathManager>,
    tracker: TaskTracker,
    state: RwLock<SharedState>,
    writers: Mutex<HashMap<String, RecordingWriter>>,
    metadata: Arc<tokio::sync::Mutex<Option<MetadataFile>>>,
    ch_new: mpsc::Sender<NewSessionEnvelope>,
    ch_new_rx: Mutex<Option<mpsc::Receiver<NewSessionEnvelope>>>,
    ch_candidates: mpsc::Sender<AddCandidatesEnvelope>,
    ch_candidates_rx: Mutex<Option<mpsc::Receiver<AddCandidatesEnvelope>>>,
}

impl WebRtcSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        config: Arc<WebRtcConfig>,
        api: Arc<API>,
        params: SessionParams,
        room: Arc<Room>,
        path_manager: Arc<dyn PathManager>,
        parent: Weak<WebRtcManager>,
        parent_ctx: &CancellationToken,
        tracker: TaskTracker,
    ) -> Arc<Self> {
        let (ch_new, ch_new_rx) = mpsc::channel(1);
        let (ch_candidates, ch_candidates_rx) = mpsc::channel(1);

        let session = Arc::new(Self {
            config,
            api,
            params,
            id: Uuid::new_v4(),
            secret: Uuid::new_v4(),
            created: Utc::now(),
            room,
            ctx: parent_ctx.child_token(),
            parent,
            path_manager,
            tracker,
            state: RwLock::new(SharedState::default()),
            writers: Mutex::new(HashMap::new()),
            metadata: Arc::new(tokio::sync::Mutex::new(None)),
            ch_new,
            ch_new_rx: Mutex::new(Some(ch_new_rx)),
            ch_candidates,
            ch_candidates_rx: Mutex::new(Some(ch_candidates_rx)),
        });

        tracing::info!(
            session = %session.short_id(),
            "created by {}",
            session.params.remote_addr
        );

        let run = Arc::clone(&session);
        session.tracker.spawn(async move { run.run().await });

        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn secret(&self) -> Uuid {
        self.secret
    }

    pub fn room_id(&self) -> Uuid {
        self.room.id()
    }

    pub fn is_publish(&self) -> bool {
        self.params.publish
    }

    /// Cancel the session; the run loop performs teardown.
    pub fn close(&self) {
        self.ctx.cancel();
    }

    pub(crate) fn context(&self) -> CancellationToken {
        self.ctx.clone()
    }

    fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Forward a pending offer to the run loop. The caller observes the
    /// outcome through the envelope's response channel; a session whose
    /// context already ended drops the envelope.
    pub(crate) async fn deliver_new(&self, envelope: NewSessionEnvelope) {
        tokio::select! {
            _ = self.ch_new.send(envelope) => {}
            _ = self.ctx.cancelled() => {}
        }
    }

    /// Deliver remote ICE candidates; blocks until the apply loop handled
    /// them. Fails with `terminated` once the session context has ended.
    pub(crate) async fn add_candidates(
        &self,
        candidates: Vec<webrtc::ice_transport::ice_candidate::RTCIceCandidateInit>,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        let envelope = AddCandidatesEnvelope {
            candidates,
            res: tx,
        };

        tokio::select! {
            sent = self.ch_candidates.send(envelope) => {
                if sent.is_err() {
                    return Err(SessionError::Terminated);
                }
            }
            _ = self.ctx.cancelled() => return Err(SessionError::Terminated),
        }

        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or(Err(SessionError::Terminated)),
            _ = self.ctx.cancelled() => Err(SessionError::Terminated),
        }
    }

    /// Concurrent-safe snapshot of the session.
    pub async fn api_item(&self) -> SessionApiItem {
        let pc = self.state.read().pc.clone();

        let mut peer_connection_established = false;
        let mut local_candidate = String::new();
        let mut remote_candidate = String::new();
        let mut bytes_received = 0;
        let mut bytes_sent = 0;

        if let Some(pc) = pc {
            peer_connection_established = true;
            local_candidate = pc.local_candidate();
            remote_candidate = pc.remote_candidate();
            (bytes_received, bytes_sent) = pc.byte_counters().await;
        }

        SessionApiItem {
            id: self.id,
            created: self.created,
            remote_addr: self.params.remote_addr.clone(),
            state: if self.params.publish {
                SessionApiState::Publish
            } else {
                SessionApiState::Read
            },
            path: self.params.path_name.clone(),
            peer_connection_established,
            local_candidate,
            remote_candidate,
            bytes_received,
            bytes_sent,
        }
    }

    /// Hand the writer map over to room cleanup.
    pub(crate) fn take_writers(&self) -> Vec<RecordingWriter> {
        self.writers.lock().drain().map(|(_, w)| w).collect()
    }

    async fn run(self: Arc<Self>) {
        let err = self.run_inner().await;

        self.ctx.cancel();

        if let Some(parent) = self.parent.upgrade() {
            parent.close_session(&self);
        }

        tracing::info!(session = %self.short_id(), "closed ({err})");
    }

    async fn run_inner(&self) -> SessionError {
        let Some(mut ch_new_rx) = self.ch_new_rx.lock().take() else {
            return SessionError::Terminated;
        };

        let envelope = tokio::select! {
            req = ch_new_rx.recv() => match req {
                Some(req) => req,
                None => return SessionError::Terminated,
            },
            _ = self.ctx.cancelled() => return SessionError::Terminated,
        };

        let mut res = Some(envelope.res);

        let outcome = if self.params.publish {
            self.run_publish(&mut res).await
        } else {
            self.run_read(&mut res).await
        };
        let err = match outcome {
            Ok(never) => match never {},
            Err(err) => err,
        };

        // The envelope is written at most once: at the answer, or here with
        // a status. Post-answer errors only reach the closed() log line.
        if let Some(res) = res.take() {
            if let Some(status) = err.status_code() {
                let _ = res.send(Err(SessionRefusal::of(&err, status)));
            }
        }

        err
    }

    fn credentials(&self) -> AuthCredentials {
        let ip = self
            .params
            .remote_addr
            .parse::<SocketAddr>()
            .ok()
            .map(|addr| addr.ip());
        AuthCredentials {
            query: self.params.query.clone(),
            ip,
            user: self.params.user.clone(),
            pass: self.params.pass.clone(),
            proto: AuthProtocol::WebRtc,
            id: self.id,
        }
    }

    async fn run_publish(
        &self,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<Infallible, SessionError> {
        let path = match self
            .path_manager
            .add_publisher(&self.params.path_name, self.credentials())
            .await
        {
            Ok(path) => path,
            Err(err) => {
                if err.is_authentication() {
                    // slow down brute force attempts
                    tokio::time::sleep(PAUSE_AFTER_AUTH_ERROR).await;
                }
                return Err(err.into());
            }
        };

        let outcome = self.publish_on_path(path.as_ref(), res).await;
        path.remove_publisher(self.id).await;
        outcome
    }

    async fn publish_on_path(
        &self,
        path: &dyn Path,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<Infallible, SessionError> {
        let Some(parent) = self.parent.upgrade() else {
            return Err(SessionError::Terminated);
        };
        let servers = parent.generate_ice_servers()?;
        drop(parent);

        let pc = PeerConnection::new(&self.api, servers).await?;
        let outcome = self.publish_with_pc(path, &pc, res).await;
        pc.close().await;
        outcome
    }

    async fn publish_with_pc(
        &self,
        path: &dyn Path,
        pc: &Arc<PeerConnection>,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<Infallible, SessionError> {
        let offer_sdp = String::from_utf8(self.params.offer.clone())
            .map_err(|_| SessionError::InvalidOffer)?;

        let parsed =
            SdpSessionDescription::unmarshal(&mut std::io::Cursor::new(offer_sdp.as_bytes()))?;
        let count = track_count(&parsed.media_descriptions)?;

        // Both transceivers are added unconditionally; absent media is
        // tolerated and keeps the answer symmetric.
        pc.inner()
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        pc.inner()
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;

        let (track_tx, track_rx) = mpsc::channel::<TrackRecvPair>(1);
        {
            let ctx = self.ctx.clone();
            pc.inner().on_track(Box::new(move |track, receiver, _transceiver| {
                let track_tx = track_tx.clone();
                let ctx = ctx.clone();
                Box::pin(async move {
                    tokio::select! {
                        _ = track_tx.send(TrackRecvPair { track, receiver }) => {}
                        _ = ctx.cancelled() => {}
                    }
                })
            }));
        }

        self.install_data_channel_handler(pc);

        let offer = RTCSessionDescription::offer(offer_sdp)?;
        pc.inner().set_remote_description(offer).await?;
        let answer = pc.inner().create_answer(None).await?;
        pc.inner().set_local_description(answer).await?;
        tokio::select! {
            _ = pc.wait_gathering_complete() => {}
            _ = self.ctx.cancelled() => return Err(SessionError::Terminated),
        }

        self.write_answer(pc, res).await?;

        self.spawn_candidate_loop(pc);

        wait_until_connected(&self.ctx, &pc.connected()).await?;

        self.state.write().pc = Some(Arc::clone(pc));

        let tracks =
            gather_incoming_tracks(&self.ctx, &pc.disconnected(), track_rx, count).await?;
        let medias: Vec<MediaDescriptor> = tracks.iter().map(|t| t.media().clone()).collect();

        let stream = path.start_publisher(self.id, medias, true).await?;

        tracing::info!(
            session = %self.short_id(),
            "is publishing to path '{}', {} tracks",
            path.name(),
            tracks.len()
        );

        for track in &tracks {
            let writer = self.create_writer(track.kind())?;
            track.start(
                &self.tracker,
                self.ctx.clone(),
                Arc::clone(pc),
                Arc::clone(&stream),
                Some(writer),
                Arc::clone(&self.room),
            );
        }

        let disconnected = pc.disconnected();
        tokio::select! {
            _ = disconnected.cancelled() => Err(SessionError::PeerConnectionClosed),
            _ = self.ctx.cancelled() => Err(SessionError::Terminated),
        }
    }

    async fn run_read(
        &self,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<Infallible, SessionError> {
        let (path, stream) = match self
            .path_manager
            .add_reader(&self.params.path_name, self.credentials())
            .await
        {
            Ok(found) => found,
            Err(err) => {
                if err.is_authentication() {
                    // slow down brute force attempts
                    tokio::time::sleep(PAUSE_AFTER_AUTH_ERROR).await;
                }
                return Err(err.into());
            }
        };

        let outcome = self.read_from_path(path.as_ref(), &stream, res).await;
        path.remove_reader(self.id).await;
        outcome
    }

    async fn read_from_path(
        &self,
        path: &dyn Path,
        stream: &Arc<Stream>,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<Infallible, SessionError> {
        let tracks = gather_outgoing_tracks(stream.medias())?;

        let Some(parent) = self.parent.upgrade() else {
            return Err(SessionError::Terminated);
        };
        let servers = parent.generate_ice_servers()?;
        drop(parent);

        let pc = PeerConnection::new(&self.api, servers).await?;
        let outcome = self.read_with_pc(path, stream, &tracks, &pc, res).await;
        pc.close().await;
        stream.remove_reader(self.id);
        outcome
    }

    async fn read_with_pc(
        &self,
        path: &dyn Path,
        stream: &Arc<Stream>,
        tracks: &[OutgoingTrack],
        pc: &Arc<PeerConnection>,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<Infallible, SessionError> {
        for track in tracks {
            track.attach(pc).await?;
        }

        let offer_sdp = String::from_utf8(self.params.offer.clone())
            .map_err(|_| SessionError::InvalidOffer)?;
        let offer = RTCSessionDescription::offer(offer_sdp)?;
        pc.inner().set_remote_description(offer).await?;
        let answer = pc.inner().create_answer(None).await?;
        pc.inner().set_local_description(answer).await?;
        tokio::select! {
            _ = pc.wait_gathering_complete() => {}
            _ = self.ctx.cancelled() => return Err(SessionError::Terminated),
        }

        self.write_answer(pc, res).await?;

        self.spawn_candidate_loop(pc);

        wait_until_connected(&self.ctx, &pc.connected()).await?;

        self.state.write().pc = Some(Arc::clone(pc));

        let (ring_tx, mut ring_rx) = mpsc::channel::<WriteTask>(self.config.read_buffer_count.max(1));
        let (write_err_tx, mut write_err_rx) = mpsc::channel::<SessionError>(1);

        for track in tracks {
            track.start(
                &self.tracker,
                self.ctx.clone(),
                self.id,
                stream,
                ring_tx.clone(),
                self.config.read_buffer_count,
            );
        }
        drop(ring_tx);

        tracing::info!(
            session = %self.short_id(),
            "is reading from path '{}', {} tracks",
            path.name(),
            tracks.len()
        );

        {
            let ctx = self.ctx.clone();
            self.tracker.spawn(async move {
                loop {
                    tokio::select! {
                        task = ring_rx.recv() => {
                            let Some(task) = task else { return };
                            if let Err(err) = task.track.write_rtp(&task.packet).await {
                                let _ = write_err_tx.try_send(SessionError::from(err));
                                return;
                            }
                        }
                        _ = ctx.cancelled() => return,
                    }
                }
            });
        }

        let disconnected = pc.disconnected();
        tokio::select! {
            _ = disconnected.cancelled() => Err(SessionError::PeerConnectionClosed),
            err = write_err_rx.recv() => Err(err.unwrap_or(SessionError::Terminated)),
            _ = self.ctx.cancelled() => Err(SessionError::Terminated),
        }
    }

    /// Emit the local SDP through the response envelope. From here on the
    /// HTTP request is answered and later errors are internal only.
    async fn write_answer(
        &self,
        pc: &Arc<PeerConnection>,
        res: &mut Option<oneshot::Sender<NewSessionResult>>,
    ) -> Result<(), SessionError> {
        let local = pc
            .inner()
            .local_description()
            .await
            .ok_or(SessionError::MissingLocalDescription)?;

        if let Some(res) = res.take() {
            let _ = res.send(Ok(SessionAnswer {
                secret: self.secret,
                answer: local.sdp.into_bytes(),
            }));
        }
        Ok(())
    }

    /// Single task applying remote candidates in arrival order. One response
    /// per envelope; the first failed candidate ends the request.
    fn spawn_candidate_loop(&self, pc: &Arc<PeerConnection>) {
        let Some(mut rx) = self.ch_candidates_rx.lock().take() else {
            return;
        };
        let ctx = self.ctx.clone();
        let pc = Arc::clone(pc);
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    req = rx.recv() => {
                        let Some(req) = req else { return };
                        let mut outcome = Ok(());
                        for candidate in req.candidates {
                            if let Err(err) = pc.add_ice_candidate(candidate).await {
                                outcome = Err(SessionError::from(err));
                                break;
                            }
                        }
                        let _ = req.res.send(outcome);
                    }
                    _ = ctx.cancelled() => return,
                }
            }
        });
    }

    fn artifact_dir(&self) -> PathBuf {
        self.config
            .streams_dir
            .join(slug(self.room.club_name()))
            .join(self.room.event_name())
    }

    fn create_writer(&self, kind: MediaKind) -> Result<RecordingWriter, SessionError> {
        let dir = self.artifact_dir();
        std::fs::create_dir_all(&dir)?;

        let (path, writer): (PathBuf, Box<dyn Writer + Send>) = match kind {
            MediaKind::Audio => {
                let path = dir.join(format!("{}-audio.ogg", self.id));
                let file = std::fs::File::create(&path)?;
                (
                    path,
                    Box::new(OggWriter::new(file, OPUS_SAMPLE_RATE, OPUS_CHANNEL_COUNT)?),
                )
            }
            MediaKind::Video => {
                let path = dir.join(format!("{}-video.h264", self.id));
                let file = std::fs::File::create(&path)?;
                (path, Box::new(H264Writer::new(file)))
            }
        };

        let writer = RecordingWriter::new(path.clone(), writer);
        self.writers
            .lock()
            .insert(path.to_string_lossy().into_owned(), writer.clone());
        Ok(writer)
    }

    /// Attach the metadata side-channel: messages are appended
    /// newline-terminated while the room records, and the file is uploaded
    /// (or discarded) when the channel closes.
    fn install_data_channel_handler(&self, pc: &Arc<PeerConnection>) {
        let room = Arc::clone(&self.room);
        let metadata = Arc::clone(&self.metadata);
        let dir = self.artifact_dir();
        let session_id = self.id;

        pc.inner().on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let room = Arc::clone(&room);
            let metadata = Arc::clone(&metadata);
            let dir = dir.clone();

            {
                let metadata = Arc::clone(&metadata);
                let dir = dir.clone();
                dc.on_open(Box::new(move || {
                    let metadata = Arc::clone(&metadata);
                    let dir = dir.clone();
                    Box::pin(async move {
                        let path = dir.join(format!("{session_id}-metadata.txt"));
                        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
                            tracing::error!(error = %err, "failed to create metadata dir");
                            return;
                        }
                        match tokio::fs::OpenOptions::new()
                            .append(true)
                            .create(true)
                            .open(&path)
                            .await
                        {
                            Ok(file) => {
                                *metadata.lock().await = Some(MetadataFile { path, file });
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "failed to open metadata file");
                            }
                        }
                    })
                }));
            }

            {
                let metadata = Arc::clone(&metadata);
                let room = Arc::clone(&room);
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let metadata = Arc::clone(&metadata);
                    let room = Arc::clone(&room);
                    Box::pin(async move {
                        if !room.is_recording() {
                            return;
                        }
                        let mut guard = metadata.lock().await;
                        if let Some(meta) = guard.as_mut() {
                            if let Err(err) = meta.file.write_all(&msg.data).await {
                                tracing::warn!(error = %err, "metadata append failed");
                                return;
                            }
                            let _ = meta.file.write_all(b"\n").await;
                        }
                    })
                }));
            }

            dc.on_close(Box::new(move || {
                let metadata = Arc::clone(&metadata);
                let room = Arc::clone(&room);
                Box::pin(async move {
                    let Some(mut meta) = metadata.lock().await.take() else {
                        return;
                    };
                    let _ = meta.file.flush().await;
                    drop(meta.file);

                    if room.is_recording() {
                        let bucket = slug(room.club_name());
                        let Some(basename) = meta.path.file_name().and_then(|n| n.to_str())
                        else {
                            return;
                        };
                        let key = format!("{}/{}", room.event_name(), basename);
                        match room.storage().upload_object(&bucket, &key, &meta.path).await {
                            Ok(()) => {
                                let _ = tokio::fs::remove_file(&meta.path).await;
                                tracing::info!(bucket, key, "metadata uploaded");
                            }
                            Err(err) => {
                                tracing::warn!(bucket, key, error = %err, "metadata upload failed");
                            }
                        }
                    } else {
                        let _ = tokio::fs::remove_file(&meta.path).await;
                    }
                })
            }));

            Box::pin(async {})
        }));
    }
}

/// Number of RTP tracks an offer's media sections announce.
///
/// At most one video, one audio, and one data-channel section; the data
/// channel is not counted. The count may be zero (data-channel-only offer).
pub(crate) fn track_count(medias: &[MediaDescription]) -> Result<usize, SessionError> {
    let mut video = false;
    let mut audio = false;
    let mut data_channel = false;
    let mut count = 0;

    for media in medias {
        match media.media_name.media.as_str() {
            "video" => {
                if video {
                    return Err(SessionError::DuplicateMedia);
                }
                video = true;
                count += 1;
            }
            "audio" => {
                if audio {
                    return Err(SessionError::DuplicateMedia);
                }
                audio = true;
                count += 1;
            }
            "application" => {
                if data_channel {
                    return Err(SessionError::DuplicateDataChannel);
                }
                data_channel = true;
            }
            other => return Err(SessionError::UnsupportedMedia(other.to_string())),
        }
    }

    Ok(count)
}

/// Race the handshake deadline, the connected signal, and cancellation.
pub(crate) async fn wait_until_connected(
    ctx: &CancellationToken,
    connected: &CancellationToken,
) -> Result<(), SessionError> {
    tokio::select! {
        _ = tokio::time::sleep(HANDSHAKE_TIMEOUT) => Err(SessionError::ConnectDeadline),
        _ = connected.cancelled() => Ok(()),
        _ = ctx.cancelled() => Err(SessionError::Terminated),
    }
}

/// Collect incoming tracks until the announced count is reached, the gather
/// deadline fires, the peer disconnects, or the session is cancelled.
pub(crate) async fn gather_incoming_tracks(
    ctx: &CancellationToken,
    disconnected: &CancellationToken,
    mut track_rx: mpsc::Receiver<TrackRecvPair>,
    count: usize,
) -> Result<Vec<IncomingTrack>, SessionError> {
    let mut tracks = Vec::new();

    let deadline = tokio::time::sleep(TRACK_GATHER_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                if count == 0 {
                    return Ok(tracks);
                }
                return Err(SessionError::TrackGatherDeadline);
            }
            pair = track_rx.recv() => {
                let Some(pair) = pair else {
                    return Err(SessionError::Terminated);
                };
                tracks.push(IncomingTrack::new(pair.track, pair.receiver)?);
                if tracks.len() == count {
                    return Ok(tracks);
                }
            }
            _ = disconnected.cancelled() => return Err(SessionError::PeerConnectionClosed),
            _ = ctx.cancelled() => return Err(SessionError::Terminated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_media_sections(sdp: &str) -> Vec<MediaDescription> {
        let parsed =
            SdpSessionDescription::unmarshal(&mut std::io::Cursor::new(sdp.as_bytes())).unwrap();
        parsed.media_descriptions
    }

    fn offer_with_sections(sections: &[&str]) -> String {
        let mut sdp = String::from(
            "v=0\r\no=- 123456 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
        );
        for section in sections {
            sdp.push_str(section);
        }
        sdp
    }

    const VIDEO_SECTION: &str =
        "m=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";
    const AUDIO_SECTION: &str =
        "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\n";
    const DATA_SECTION: &str =
        "m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\nc=IN IP4 0.0.0.0\r\n";

    #[test]
    fn test_track_count_video_audio_data() {
        let medias =
            parse_media_sections(&offer_with_sections(&[VIDEO_SECTION, AUDIO_SECTION, DATA_SECTION]));
        assert_eq!(track_count(&medias).unwrap(), 2);
    }

    #[test]
    fn test_track_count_zero() {
        let medias = parse_media_sections(&offer_with_sections(&[DATA_SECTION]));
        assert_eq!(track_count(&medias).unwrap(), 0);

        let medias = parse_media_sections(&offer_with_sections(&[]));
        assert_eq!(track_count(&medias).unwrap(), 0);
    }

    #[test]
    fn test_track_count_duplicate_video() {
        let medias =
            parse_media_sections(&offer_with_sections(&[VIDEO_SECTION, VIDEO_SECTION]));
        assert!(matches!(
            track_count(&medias),
            Err(SessionError::DuplicateMedia)
        ));
    }

    #[test]
    fn test_track_count_duplicate_data_channel() {
        let medias = parse_media_sections(&offer_with_sections(&[DATA_SECTION, DATA_SECTION]));
        assert!(matches!(
            track_count(&medias),
            Err(SessionError::DuplicateDataChannel)
        ));
    }

    #[test]
    fn test_track_count_unsupported_media() {
        let medias = parse_media_sections(&offer_with_sections(&[
            "m=text 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\n",
        ]));
        let err = track_count(&medias).unwrap_err();
        assert_eq!(err.to_string(), "unsupported media 'text'");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_connected_deadline() {
        let ctx = CancellationToken::new();
        let connected = CancellationToken::new();
        let err = wait_until_connected(&ctx, &connected).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectDeadline));
    }

    #[tokio::test]
    async fn test_wait_until_connected_ok() {
        let ctx = CancellationToken::new();
        let connected = CancellationToken::new();
        connected.cancel();
        wait_until_connected(&ctx, &connected).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_connected_terminated() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let connected = CancellationToken::new();
        let err = wait_until_connected(&ctx, &connected).await.unwrap_err();
        assert!(matches!(err, SessionError::Terminated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gather_zero_tracks_succeeds_on_deadline() {
        let ctx = CancellationToken::new();
        let disconnected = CancellationToken::new();
        let (_tx, rx) = mpsc::channel(1);

        let tracks = gather_incoming_tracks(&ctx, &disconnected, rx, 0)
            .await
            .unwrap();
        assert!(tracks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gather_missing_tracks_times_out() {
        let ctx = CancellationToken::new();
        let disconnected = CancellationToken::new();
        let (_tx, rx) = mpsc::channel(1);

        let err = gather_incoming_tracks(&ctx, &disconnected, rx, 2)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "deadline exceeded while waiting tracks");
    }

    #[tokio::test]
    async fn test_gather_stops_on_disconnect() {
        let ctx = CancellationToken::new();
        let disconnected = CancellationToken::new();
        disconnected.cancel();
        let (_tx, rx) = mpsc::channel(1);

        let err = gather_incoming_tracks(&ctx, &disconnected, rx, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::PeerConnectionClosed));
    }

    #[tokio::test]
    async fn test_gather_stops_on_cancel() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let disconnected = CancellationToken::new();
        let (_tx, rx) = mpsc::channel(1);

        let err = gather_incoming_tracks(&ctx, &disconnected, rx, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Terminated));
    }
}
