//! Test helpers and fixtures shared across the workspace's tests.

use crate::media::{MediaDescriptor, MediaKind, RtpCodecParams};
use crate::path::{AuthCredentials, Path, PathError, PathManager};
use crate::stream::Stream;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;
use webrtc::rtp::packet::Packet;

/// H.264 video descriptor
#[must_use]
pub fn h264_video() -> MediaDescriptor {
    MediaDescriptor {
        kind: MediaKind::Video,
        codec: RtpCodecParams {
            mime_type: "video/H264".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f"
                    .to_string(),
            payload_type: 102,
        },
    }
}

/// VP8 video descriptor
#[must_use]
pub fn vp8_video() -> MediaDescriptor {
    MediaDescriptor {
        kind: MediaKind::Video,
        codec: RtpCodecParams {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            payload_type: 96,
        },
    }
}

/// Opus audio descriptor
#[must_use]
pub fn opus_audio() -> MediaDescriptor {
    MediaDescriptor {
        kind: MediaKind::Audio,
        codec: RtpCodecParams {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            payload_type: 111,
        },
    }
}

/// G.722 audio descriptor
#[must_use]
pub fn g722_audio() -> MediaDescriptor {
    MediaDescriptor {
        kind: MediaKind::Audio,
        codec: RtpCodecParams {
            mime_type: "audio/G722".to_string(),
            clock_rate: 8000,
            channels: 1,
            sdp_fmtp_line: String::new(),
            payload_type: 9,
        },
    }
}

/// A video codec the WebRTC front-end does not carry
#[must_use]
pub fn unsupported_video() -> MediaDescriptor {
    MediaDescriptor {
        kind: MediaKind::Video,
        codec: RtpCodecParams {
            mime_type: "video/H265".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            payload_type: 98,
        },
    }
}

/// Minimal RTP packet with the given sequence number
#[must_use]
pub fn rtp_packet(sequence_number: u16) -> Packet {
    let mut packet = Packet::default();
    packet.header.version = 2;
    packet.header.sequence_number = sequence_number;
    packet
}

#[derive(Debug)]
struct StaticPathState {
    stream: Option<Arc<Stream>>,
    publisher: Option<Uuid>,
}

/// A single path of the [`StaticPathManager`].
#[derive(Debug)]
pub struct StaticPath {
    name: String,
    state: Mutex<StaticPathState>,
}

impl StaticPath {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(StaticPathState {
                stream: None,
                publisher: None,
            }),
        })
    }
}

#[async_trait]
impl Path for StaticPath {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_publisher(
        &self,
        session_id: Uuid,
        medias: Vec<MediaDescriptor>,
        _generate_rtp_packets: bool,
    ) -> Result<Arc<Stream>, PathError> {
        let stream = Stream::new(medias);
        let mut state = self.state.lock();
        state.stream = Some(Arc::clone(&stream));
        state.publisher = Some(session_id);
        Ok(stream)
    }

    async fn remove_publisher(&self, session_id: Uuid) {
        let mut state = self.state.lock();
        if state.publisher == Some(session_id) {
            state.publisher = None;
            state.stream = None;
        }
    }

    async fn remove_reader(&self, session_id: Uuid) {
        if let Some(stream) = self.state.lock().stream.as_ref() {
            stream.remove_reader(session_id);
        }
    }
}

/// In-memory broker: routes by path name, optionally checks one fixed set
/// of credentials, and reports `"no one is publishing"` for idle paths.
#[derive(Default)]
pub struct StaticPathManager {
    paths: DashMap<String, Arc<StaticPath>>,
    credentials: Option<(String, String)>,
}

impl StaticPathManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require this user/pass pair on every request.
    #[must_use]
    pub fn with_credentials(user: &str, pass: &str) -> Self {
        Self {
            paths: DashMap::new(),
            credentials: Some((user.to_string(), pass.to_string())),
        }
    }

    /// Seed `path_name` with an already-running publisher stream.
    pub fn publish(&self, path_name: &str, medias: Vec<MediaDescriptor>) -> Arc<Stream> {
        let path = self.get_or_create(path_name);
        let stream = Stream::new(medias);
        let mut state = path.state.lock();
        state.stream = Some(Arc::clone(&stream));
        state.publisher = Some(Uuid::new_v4());
        stream
    }

    fn get_or_create(&self, path_name: &str) -> Arc<StaticPath> {
        self.paths
            .entry(path_name.to_string())
            .or_insert_with(|| StaticPath::new(path_name))
            .clone()
    }

    fn authenticate(&self, credentials: &AuthCredentials) -> Result<(), PathError> {
        if let Some((user, pass)) = &self.credentials {
            if &credentials.user != user || &credentials.pass != pass {
                return Err(PathError::Authentication("invalid credentials".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PathManager for StaticPathManager {
    async fn add_publisher(
        &self,
        path_name: &str,
        credentials: AuthCredentials,
    ) -> Result<Arc<dyn Path>, PathError> {
        self.authenticate(&credentials)?;
        let path = self.get_or_create(path_name);
        if path.state.lock().publisher.is_some() {
            return Err(PathError::Other(format!(
                "someone is already publishing on path '{path_name}'"
            )));
        }
        Ok(path)
    }

    async fn add_reader(
        &self,
        path_name: &str,
        credentials: AuthCredentials,
    ) -> Result<(Arc<dyn Path>, Arc<Stream>), PathError> {
        self.authenticate(&credentials)?;
        let path = self.get_or_create(path_name);
        let stream = path.state.lock().stream.clone();
        match stream {
            Some(stream) => Ok((path, stream)),
            None => Err(PathError::Other(format!(
                "no one is publishing on path '{path_name}'"
            ))),
        }
    }
}
