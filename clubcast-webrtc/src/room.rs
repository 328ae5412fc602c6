//! Room aggregation: sessions and their recordings, grouped by event.

use crate::config::CLEANUP_UPLOAD_TIMEOUT;
use crate::manager::WebRtcManager;
use clubcast_core::storage::{ObjectStorage, StorageError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Storage prefix form of a human name: trimmed, lowercased, spaces dashed.
#[must_use]
pub fn slug(s: &str) -> String {
    s.trim().to_lowercase().replace(' ', "-")
}

/// A stream joined to the room.
#[derive(Debug, Clone)]
pub struct Streamer {
    pub id: String,
}

#[derive(Default)]
struct RoomInner {
    /// session id → session secret
    sessions: HashMap<Uuid, Uuid>,
    /// session secret → session id
    sessions_by_secret: HashMap<Uuid, Uuid>,
    streamers: HashMap<String, Streamer>,
}

/// Sessions and recordings of one club event.
///
/// Rooms hold weak handles (session ids); the manager owns the sessions and
/// serializes room operations.
pub struct Room {
    uuid: Uuid,
    club_name: String,
    event_name: String,
    region: String,
    storage: Arc<dyn ObjectStorage>,
    recording: AtomicBool,
    inner: Mutex<RoomInner>,
}

/// Room snapshot for the API.
#[derive(Debug, Clone, Serialize)]
pub struct RoomApiItem {
    pub id: Uuid,
    pub paths: Vec<String>,
}

impl Room {
    pub(crate) fn new(
        uuid: Uuid,
        club_name: String,
        event_name: String,
        region: String,
        storage: Arc<dyn ObjectStorage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            club_name,
            event_name,
            region,
            storage,
            recording: AtomicBool::new(false),
            inner: Mutex::new(RoomInner::default()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.uuid
    }

    pub fn club_name(&self) -> &str {
        &self.club_name
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub(crate) fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    /// Register a streamer handle; idempotent by id, last writer wins.
    pub fn join(&self, stream_id: &str) {
        self.inner.lock().streamers.insert(
            stream_id.to_string(),
            Streamer {
                id: stream_id.to_string(),
            },
        );
    }

    /// Ensure the destination bucket exists, then turn recording on.
    pub async fn record(&self) -> Result<(), StorageError> {
        let bucket = slug(&self.club_name);
        self.storage.create_bucket(&bucket, &self.region).await?;
        self.recording.store(true, Ordering::Relaxed);
        tracing::info!(room = %self.uuid, bucket, "recording enabled");
        Ok(())
    }

    pub(crate) fn add_session(&self, session_id: Uuid, secret: Uuid) {
        let mut inner = self.inner.lock();
        inner.sessions.insert(session_id, secret);
        inner.sessions_by_secret.insert(secret, session_id);
    }

    pub(crate) fn remove_session(&self, session_id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(secret) = inner.sessions.remove(&session_id) {
            inner.sessions_by_secret.remove(&secret);
        }
    }

    pub fn api_item(&self) -> RoomApiItem {
        let inner = self.inner.lock();
        RoomApiItem {
            id: self.uuid,
            paths: inner.streamers.keys().cloned().collect(),
        }
    }

    /// Upload (or discard) every member session's artifacts, then close the
    /// members and clear the streamer map.
    ///
    /// Uploads run concurrently and are awaited with a bounded deadline;
    /// failures are logged and never block the session close.
    pub(crate) async fn cleanup(&self, manager: &WebRtcManager) {
        let recording = self.is_recording();
        let members: Vec<(Uuid, Uuid)> = self.inner.lock().sessions.drain().collect();

        let bucket = slug(&self.club_name);
        let mut uploads = tokio::task::JoinSet::new();

        for (session_id, _) in &members {
            let Some(session) = manager.session_by_id(*session_id) else {
                continue;
            };
            for writer in session.take_writers() {
                let storage = Arc::clone(&self.storage);
                let bucket = bucket.clone();
                let event_name = self.event_name.clone();
                uploads.spawn(async move {
                    if let Err(err) = writer.close() {
                        tracing::debug!(error = %err, "writer close failed");
                    }
                    let path = writer.path().to_path_buf();

                    if !recording {
                        let _ = tokio::fs::remove_file(&path).await;
                        return;
                    }

                    if tokio::fs::metadata(&path).await.is_err() {
                        tracing::warn!(path = %path.display(), "artifact missing, skipping upload");
                        return;
                    }

                    let Some(basename) = path.file_name().and_then(|n| n.to_str()) else {
                        return;
                    };
                    let key = format!("{event_name}/{basename}");

                    match storage.upload_object(&bucket, &key, &path).await {
                        Ok(()) => {
                            let _ = tokio::fs::remove_file(&path).await;
                            tracing::info!(bucket, key, "artifact uploaded");
                        }
                        Err(err) => {
                            // Best effort: keep the local file for manual recovery.
                            tracing::warn!(bucket, key, error = %err, "artifact upload failed");
                        }
                    }
                });
            }
        }

        let drain = async {
            while uploads.join_next().await.is_some() {}
        };
        if tokio::time::timeout(CLEANUP_UPLOAD_TIMEOUT, drain).await.is_err() {
            tracing::warn!(room = %self.uuid, "cleanup uploads exceeded deadline");
        }

        for (session_id, secret) in members {
            self.inner.lock().sessions_by_secret.remove(&secret);
            if let Some(session) = manager.session_by_id(session_id) {
                session.close();
            }
        }

        self.inner.lock().streamers.clear();
    }

    #[cfg(test)]
    pub(crate) fn member_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}
