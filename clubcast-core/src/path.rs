//! Broker interface that routes publishers and readers to named paths.
//!
//! The broker is an external authority: it authenticates a request, resolves
//! the target path, and hands back a [`Path`] handle the session uses for
//! the rest of its life. Only the interface is defined here.

use crate::media::MediaDescriptor;
use crate::stream::Stream;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Protocol a request arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    WebRtc,
}

/// Credentials attached to an add-publisher / add-reader request.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    pub query: String,
    pub ip: Option<IpAddr>,
    pub user: String,
    pub pass: String,
    pub proto: AuthProtocol,
    pub id: Uuid,
}

/// Errors returned by the broker.
///
/// Authentication failures are typed so callers can apply their throttling
/// policy; everything else travels as a message. A reader request against a
/// path with no publisher uses a message starting with
/// `"no one is publishing"` — callers map that prefix to not-found.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("{0}")]
    Other(String),
}

impl PathError {
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// A named rendezvous routing media from one publisher to many readers.
#[async_trait]
pub trait Path: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Publish the given media set on this path, creating the stream readers
    /// attach to. `generate_rtp_packets` asks the stream layer to regenerate
    /// RTP framing instead of passing the publisher's packets through.
    async fn start_publisher(
        &self,
        session_id: Uuid,
        medias: Vec<MediaDescriptor>,
        generate_rtp_packets: bool,
    ) -> Result<Arc<Stream>, PathError>;

    async fn remove_publisher(&self, session_id: Uuid);

    async fn remove_reader(&self, session_id: Uuid);
}

/// The broker authority consumed by session front-ends.
#[async_trait]
pub trait PathManager: Send + Sync {
    /// Authenticate and register a publisher on `path_name`.
    async fn add_publisher(
        &self,
        path_name: &str,
        credentials: AuthCredentials,
    ) -> Result<Arc<dyn Path>, PathError>;

    /// Authenticate and register a reader on `path_name`, returning the
    /// path handle and the stream currently published on it.
    async fn add_reader(
        &self,
        path_name: &str,
        credentials: AuthCredentials,
    ) -> Result<(Arc<dyn Path>, Arc<Stream>), PathError>;
}
