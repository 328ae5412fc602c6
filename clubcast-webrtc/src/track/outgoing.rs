//! Outgoing (read) track construction.

use super::WriteTask;
use crate::error::SessionError;
use crate::peer_connection::PeerConnection;
use clubcast_core::media::{MediaDescriptor, MediaKind};
use clubcast_core::stream::Stream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Build the outgoing track set for a stream: the first supported video
/// codec and the first supported audio codec, at most one of each.
pub fn gather_outgoing_tracks(
    medias: &[MediaDescriptor],
) -> Result<Vec<OutgoingTrack>, SessionError> {
    let mut tracks = Vec::new();

    if let Some(media) = medias
        .iter()
        .find(|m| m.kind == MediaKind::Video && m.is_supported())
    {
        tracks.push(OutgoingTrack::new(media.clone()));
    }

    if let Some(media) = medias
        .iter()
        .find(|m| m.kind == MediaKind::Audio && m.is_supported())
    {
        tracks.push(OutgoingTrack::new(media.clone()));
    }

    if tracks.is_empty() {
        return Err(SessionError::NoSupportedCodec);
    }

    Ok(tracks)
}

/// A locally-owned track fed from a stream subscription through the
/// session's write queue.
#[derive(Debug)]
pub struct OutgoingTrack {
    media: MediaDescriptor,
    track: Arc<TrackLocalStaticRTP>,
    sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl OutgoingTrack {
    fn new(media: MediaDescriptor) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: media.codec.mime_type.clone(),
            clock_rate: media.codec.clock_rate,
            channels: media.codec.channels,
            sdp_fmtp_line: media.codec.sdp_fmtp_line.clone(),
            rtcp_feedback: vec![],
        };
        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            media.kind.to_string(),
            "clubcast".to_string(),
        ));
        Self {
            media,
            track,
            sender: Mutex::new(None),
        }
    }

    pub fn media(&self) -> &MediaDescriptor {
        &self.media
    }

    pub fn kind(&self) -> MediaKind {
        self.media.kind
    }

    /// Add the track to the peer connection, keeping the returned sender.
    pub(crate) async fn attach(&self, pc: &PeerConnection) -> Result<(), SessionError> {
        let sender = pc
            .inner()
            .add_track(Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        *self.sender.lock() = Some(sender);
        Ok(())
    }

    /// Subscribe to the stream and enqueue every packet of this track's kind
    /// onto the session's write queue; a full queue drops the packet.
    /// Also drains RTCP arriving on the sender so the engine's interceptors
    /// keep running.
    pub(crate) fn start(
        &self,
        tracker: &TaskTracker,
        ctx: CancellationToken,
        reader_id: Uuid,
        stream: &Stream,
        ring: mpsc::Sender<WriteTask>,
        capacity: usize,
    ) {
        let mut subscription = stream.subscribe(reader_id, self.media.kind, capacity);
        let track = Arc::clone(&self.track);
        let forward_ctx = ctx.clone();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_ctx.cancelled() => break,
                    packet = subscription.recv() => match packet {
                        Some(packet) => {
                            match ring.try_send(WriteTask {
                                track: Arc::clone(&track),
                                packet,
                            }) {
                                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                                Err(mpsc::error::TrySendError::Closed(_)) => break,
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        if let Some(sender) = self.sender.lock().clone() {
            tracker.spawn(async move {
                let mut buf = vec![0u8; 1500];
                loop {
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        res = sender.read(&mut buf) => if res.is_err() { break },
                    }
                }
            });
        }
    }
}
