//! WebRTC front-end configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bound on the offer → connected handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on incoming-track collection after the connection is up.
pub const TRACK_GATHER_TIMEOUT: Duration = Duration::from_secs(2);

/// Sleep before answering a failed authentication, to slow brute force.
pub const PAUSE_AFTER_AUTH_ERROR: Duration = Duration::from_secs(2);

/// Interval of keyframe requests sent upstream for incoming video.
pub(crate) const KEYFRAME_REQUEST_INTERVAL: Duration = Duration::from_secs(2);

/// Bound on room-cleanup artifact uploads.
pub(crate) const CLEANUP_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// One STUN/TURN server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// WebRTC subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// Slots in each read session's write queue
    pub read_buffer_count: usize,
    /// ICE servers handed to every peer connection
    pub ice_servers: Vec<IceServerConfig>,
    /// Root directory for recording artifacts
    pub streams_dir: PathBuf,
    /// Region used when creating recording buckets
    pub storage_region: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            read_buffer_count: 512,
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            streams_dir: PathBuf::from("streams"),
            storage_region: "eu-west-3".to_string(),
        }
    }
}
