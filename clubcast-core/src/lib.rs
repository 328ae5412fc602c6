//! Shared substrate for the clubcast media server.
//!
//! This crate carries everything the protocol front-ends have in common:
//!
//! - **`media`**: codec-level descriptors of the tracks a stream carries
//! - **`stream`**: the in-memory fan-out of a publisher's RTP to readers
//! - **`path`**: the broker interface that authenticates publishers and
//!   readers and routes them to a named path
//! - **`storage`**: the object-storage interface used for recording uploads
//! - **`logging`** / **`config`**: process bootstrap

pub mod config;
pub mod logging;
pub mod media;
pub mod path;
pub mod storage;
pub mod stream;
pub mod test_helpers;

pub use config::{LogFormat, LoggingConfig};
pub use media::{MediaDescriptor, MediaKind, RtpCodecParams};
pub use path::{AuthCredentials, AuthProtocol, Path, PathError, PathManager};
pub use storage::{MemoryStorage, ObjectStorage, OssConfig, OssStorage, StorageError};
pub use stream::Stream;
