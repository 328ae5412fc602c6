//! Incoming (published) track handling.

use super::RecordingWriter;
use crate::config::KEYFRAME_REQUEST_INTERVAL;
use crate::error::SessionError;
use crate::peer_connection::PeerConnection;
use crate::room::Room;
use clubcast_core::media::{MediaDescriptor, MediaKind, RtpCodecParams};
use clubcast_core::stream::Stream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_remote::TrackRemote;

/// A remote track received from a publisher, forwarded into the path's
/// stream and, while the room records, into a codec writer.
#[derive(Debug)]
pub struct IncomingTrack {
    track: Arc<TrackRemote>,
    _receiver: Arc<RTCRtpReceiver>,
    media: MediaDescriptor,
}

impl IncomingTrack {
    /// Wrap a remote track, validating that its codec is one we carry.
    pub(crate) fn new(
        track: Arc<TrackRemote>,
        receiver: Arc<RTCRtpReceiver>,
    ) -> Result<Self, SessionError> {
        let params = track.codec();
        let capability = params.capability;

        let kind = match track.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            RTPCodecType::Video => MediaKind::Video,
            _ => {
                return Err(SessionError::UnsupportedTrackCodec(
                    capability.mime_type.clone(),
                ))
            }
        };

        let media = MediaDescriptor {
            kind,
            codec: RtpCodecParams {
                mime_type: capability.mime_type.clone(),
                clock_rate: capability.clock_rate,
                channels: capability.channels,
                sdp_fmtp_line: capability.sdp_fmtp_line,
                payload_type: params.payload_type,
            },
        };

        if !media.is_supported() {
            return Err(SessionError::UnsupportedTrackCodec(capability.mime_type));
        }

        Ok(Self {
            track,
            _receiver: receiver,
            media,
        })
    }

    pub fn media(&self) -> &MediaDescriptor {
        &self.media
    }

    pub fn kind(&self) -> MediaKind {
        self.media.kind
    }

    /// Start forwarding RTP into the stream and, while the room records,
    /// into the writer. Video tracks also get a periodic keyframe request
    /// toward the publisher.
    pub(crate) fn start(
        &self,
        tracker: &TaskTracker,
        ctx: CancellationToken,
        pc: Arc<PeerConnection>,
        stream: Arc<Stream>,
        writer: Option<RecordingWriter>,
        room: Arc<Room>,
    ) {
        let kind = self.media.kind;

        if kind == MediaKind::Video {
            let media_ssrc = self.track.ssrc();
            let pli_ctx = ctx.clone();
            let pli_pc = Arc::clone(&pc);
            tracker.spawn(async move {
                let mut ticker = tokio::time::interval(KEYFRAME_REQUEST_INTERVAL);
                loop {
                    tokio::select! {
                        _ = pli_ctx.cancelled() => break,
                        _ = ticker.tick() => {
                            let pli = PictureLossIndication {
                                sender_ssrc: 0,
                                media_ssrc,
                            };
                            if pli_pc.write_rtcp(&[Box::new(pli)]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let track = Arc::clone(&self.track);
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    res = track.read_rtp() => match res {
                        Ok((packet, _)) => {
                            let packet = Arc::new(packet);
                            stream.write_rtp(kind, Arc::clone(&packet));

                            if let Some(writer) = &writer {
                                if room.is_recording() {
                                    if let Err(err) = writer.write_rtp(&packet) {
                                        tracing::warn!(
                                            kind = %kind,
                                            error = %err,
                                            "recording write failed"
                                        );
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            tracing::debug!(kind = %kind, error = %err, "track read ended");
                            break;
                        }
                    },
                }
            }
        });
    }
}
