use clubcast_core::path::PathError;
use http::StatusCode;
use thiserror::Error;

/// Errors a session can terminate with.
///
/// Message texts are part of the front-door contract: the HTTP layer matches
/// on them and clients see them verbatim.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("terminated")]
    Terminated,

    #[error("deadline exceeded while waiting connection")]
    ConnectDeadline,

    #[error("deadline exceeded while waiting tracks")]
    TrackGatherDeadline,

    #[error("peer connection closed")]
    PeerConnectionClosed,

    #[error("session not found")]
    NotFound,

    #[error("invalid room id '{0}'")]
    InvalidRoomId(String),

    #[error("offer is not valid UTF-8")]
    InvalidOffer,

    #[error("no local description available")]
    MissingLocalDescription,

    #[error("only a single video and a single audio track are supported")]
    DuplicateMedia,

    #[error("only a single data channel track is supported")]
    DuplicateDataChannel,

    #[error("unsupported media '{0}'")]
    UnsupportedMedia(String),

    #[error("track codec '{0}' is not supported")]
    UnsupportedTrackCodec(String),

    #[error(
        "the stream doesn't contain any supported codec, \
         which are currently AV1, VP9, VP8, H264, Opus, G722, G711"
    )]
    NoSupportedCodec,

    #[error("invalid ICE server: {0}")]
    IceServers(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Engine(#[from] webrtc::Error),

    #[error(transparent)]
    Sdp(#[from] webrtc::sdp::Error),

    #[error(transparent)]
    Media(#[from] webrtc::media::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// HTTP status for errors that refuse a session before its answer.
    ///
    /// `None` marks runtime errors that occur after the answer was emitted;
    /// those never reach the response envelope.
    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Path(PathError::Authentication(_)) => Some(StatusCode::UNAUTHORIZED),
            Self::Path(err) if err.to_string().starts_with("no one is publishing") => {
                Some(StatusCode::NOT_FOUND)
            }
            Self::Path(_) => Some(StatusCode::BAD_REQUEST),

            Self::InvalidRoomId(_)
            | Self::InvalidOffer
            | Self::MissingLocalDescription
            | Self::DuplicateMedia
            | Self::DuplicateDataChannel
            | Self::UnsupportedMedia(_)
            | Self::NoSupportedCodec
            | Self::Engine(_)
            | Self::Sdp(_) => Some(StatusCode::BAD_REQUEST),

            Self::IceServers(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),

            Self::Terminated
            | Self::ConnectDeadline
            | Self::TrackGatherDeadline
            | Self::PeerConnectionClosed
            | Self::NotFound
            | Self::UnsupportedTrackCodec(_)
            | Self::Media(_)
            | Self::Io(_) => None,
        }
    }
}

/// A session refused before its answer: status plus the client-facing text.
#[derive(Debug, Clone)]
pub struct SessionRefusal {
    pub status: StatusCode,
    pub message: String,
}

impl SessionRefusal {
    pub(crate) fn of(error: &SessionError, status: StatusCode) -> Self {
        Self {
            status,
            message: error.to_string(),
        }
    }

    pub(crate) fn terminated() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: SessionError::Terminated.to_string(),
        }
    }
}
