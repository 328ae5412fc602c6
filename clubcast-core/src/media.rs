//! Codec-level description of the tracks a stream carries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported video codecs, in preference order.
pub const SUPPORTED_VIDEO_CODECS: &[&str] =
    &["video/AV1", "video/VP9", "video/VP8", "video/H264"];

/// Supported audio codecs, in preference order.
pub const SUPPORTED_AUDIO_CODECS: &[&str] =
    &["audio/opus", "audio/G722", "audio/PCMU", "audio/PCMA"];

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// RTP-level codec parameters of a single track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpCodecParams {
    /// Full mime type, e.g. "video/H264" or "audio/opus"
    pub mime_type: String,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Audio channel count (0 for video)
    pub channels: u16,
    /// SDP fmtp line carried through negotiation
    pub sdp_fmtp_line: String,
    /// Negotiated payload type
    pub payload_type: u8,
}

/// One audio or video track of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub codec: RtpCodecParams,
}

impl MediaDescriptor {
    /// Whether the descriptor's codec is one the WebRTC front-end can carry.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        let table = match self.kind {
            MediaKind::Audio => SUPPORTED_AUDIO_CODECS,
            MediaKind::Video => SUPPORTED_VIDEO_CODECS,
        };
        table
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&self.codec.mime_type))
    }
}

/// Media kind implied by a mime type ("video/..." or "audio/...").
#[must_use]
pub fn kind_of_mime(mime_type: &str) -> Option<MediaKind> {
    let prefix = mime_type.split('/').next()?;
    match prefix.to_ascii_lowercase().as_str() {
        "audio" => Some(MediaKind::Audio),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{h264_video, opus_audio};

    #[test]
    fn test_supported_codecs() {
        assert!(h264_video().is_supported());
        assert!(opus_audio().is_supported());

        let mut exotic = h264_video();
        exotic.codec.mime_type = "video/H265".to_string();
        assert!(!exotic.is_supported());
    }

    #[test]
    fn test_mime_case_insensitive() {
        let mut desc = opus_audio();
        desc.codec.mime_type = "audio/OPUS".to_string();
        assert!(desc.is_supported());
    }

    #[test]
    fn test_kind_of_mime() {
        assert_eq!(kind_of_mime("video/VP8"), Some(MediaKind::Video));
        assert_eq!(kind_of_mime("audio/PCMU"), Some(MediaKind::Audio));
        assert_eq!(kind_of_mime("application/sdp"), None);
    }
}
