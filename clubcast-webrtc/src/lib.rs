//! WebRTC ingest/egress session subsystem.
//!
//! Publishers push audio/video/metadata over WHIP-style WebRTC offers;
//! readers pull the same streams. Every peer connection is driven by a
//! long-lived [`WebRtcSession`], coordinated by a process-wide
//! [`WebRtcManager`] that owns the session registries, ICE configuration,
//! and [`Room`] aggregation (sessions and their recordings grouped by
//! event).
//!
//! ## Architecture
//!
//! - **`WebRtcManager`**: session/room registries and request dispatch
//! - **`WebRtcSession`**: one peer connection's lifecycle, publish or read
//! - **`Room`**: recording mode, metadata capture, artifact upload
//! - **`IncomingTrack`** / **`OutgoingTrack`**: RTP demux and mux plumbing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clubcast_webrtc::{WebRtcConfig, WebRtcManager, NewSessionRequest};
//!
//! let manager = WebRtcManager::new(WebRtcConfig::default(), path_manager, storage)?;
//! let answer = manager.new_session(request).await?;
//! manager.add_candidates(answer.secret, candidates).await?;
//! ```

mod config;
mod error;
mod manager;
mod peer_connection;
mod room;
mod session;
mod track;

pub use config::{IceServerConfig, WebRtcConfig, HANDSHAKE_TIMEOUT, PAUSE_AFTER_AUTH_ERROR, TRACK_GATHER_TIMEOUT};
pub use error::{SessionError, SessionRefusal};
pub use manager::{NewSessionRequest, NewSessionResult, SessionAnswer, WebRtcManager};
pub use room::{slug, Room, RoomApiItem, Streamer};
pub use session::{SessionApiItem, SessionApiState, WebRtcSession};
pub use track::{IncomingTrack, OutgoingTrack};
