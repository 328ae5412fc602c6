//! Track plumbing: incoming demux and outgoing construction.

mod incoming;
mod outgoing;

pub use incoming::IncomingTrack;
pub use outgoing::{gather_outgoing_tracks, OutgoingTrack};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use webrtc::media::io::Writer;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// One queued RTP write toward a reader peer.
///
/// RTCP toward the reader is handled by the engine's interceptors, so RTP
/// sends are the only event the queue carries.
pub(crate) struct WriteTask {
    pub track: Arc<TrackLocalStaticRTP>,
    pub packet: Arc<Packet>,
}

/// A codec writer bound to its on-disk artifact.
///
/// The session's track-start phase is the sole creator; room cleanup is the
/// sole consumer (close + upload). The inner mutex serializes the per-packet
/// writes of the forwarding task against that close.
#[derive(Clone)]
pub(crate) struct RecordingWriter {
    path: PathBuf,
    inner: Arc<Mutex<Box<dyn Writer + Send>>>,
}

impl RecordingWriter {
    pub fn new(path: PathBuf, writer: Box<dyn Writer + Send>) -> Self {
        Self {
            path,
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_rtp(&self, packet: &Packet) -> Result<(), webrtc::media::Error> {
        self.inner.lock().write_rtp(packet)
    }

    /// Flush container trailers. Safe to call once; the forwarding task has
    /// stopped by the time cleanup runs.
    pub fn close(&self) -> Result<(), webrtc::media::Error> {
        self.inner.lock().close()
    }
}
