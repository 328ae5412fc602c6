//! In-memory fan-out of a publisher's media, scoped to a path.
//!
//! A `Stream` receives RTP from exactly one publisher and forwards it to any
//! number of readers over bounded per-reader channels. When a reader's
//! channel is full the packet is dropped for that reader only; drop counts
//! are tracked per reader for diagnostics.

use crate::media::{MediaDescriptor, MediaKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::rtp::packet::Packet;

/// How often to log per-reader drop warnings (every N drops).
const DROP_LOG_INTERVAL: u64 = 100;

#[derive(Debug)]
struct ReaderSlot {
    id: Uuid,
    kind: MediaKind,
    sender: mpsc::Sender<Arc<Packet>>,
    drop_count: Arc<AtomicU64>,
}

/// The in-memory fan-out of a publisher's media.
#[derive(Debug)]
pub struct Stream {
    medias: Vec<MediaDescriptor>,
    readers: Mutex<Vec<ReaderSlot>>,
}

impl Stream {
    #[must_use]
    pub fn new(medias: Vec<MediaDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            medias,
            readers: Mutex::new(Vec::new()),
        })
    }

    /// Media descriptors of the publisher, in publish order.
    #[must_use]
    pub fn medias(&self) -> &[MediaDescriptor] {
        &self.medias
    }

    /// Register a reader for one media kind.
    ///
    /// Packets are delivered on a bounded channel; a full channel drops the
    /// packet for this reader only. A reader may hold one subscription per
    /// kind, all keyed by the same reader id.
    pub fn subscribe(
        &self,
        reader_id: Uuid,
        kind: MediaKind,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<Packet>> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.readers.lock().push(ReaderSlot {
            id: reader_id,
            kind,
            sender,
            drop_count: Arc::new(AtomicU64::new(0)),
        });
        receiver
    }

    /// Drop every subscription held by `reader_id`.
    pub fn remove_reader(&self, reader_id: Uuid) {
        self.readers.lock().retain(|slot| slot.id != reader_id);
    }

    /// Fan an RTP packet out to every reader of `kind`.
    ///
    /// The sender map is snapshotted so no lock is held during the sends;
    /// closed readers are pruned in a second, separate lock acquisition.
    pub fn write_rtp(&self, kind: MediaKind, packet: Arc<Packet>) {
        let snapshot: Vec<(Uuid, mpsc::Sender<Arc<Packet>>, Arc<AtomicU64>)> = self
            .readers
            .lock()
            .iter()
            .filter(|slot| slot.kind == kind)
            .map(|slot| (slot.id, slot.sender.clone(), Arc::clone(&slot.drop_count)))
            .collect();

        let mut closed_ids = Vec::new();
        for (id, sender, drop_count) in &snapshot {
            match sender.try_send(Arc::clone(&packet)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let prev = drop_count.fetch_add(1, Ordering::Relaxed);
                    if (prev + 1) % DROP_LOG_INTERVAL == 0 {
                        tracing::warn!(
                            reader = %id,
                            dropped = prev + 1,
                            "reader dropped packets due to backpressure"
                        );
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed_ids.push(*id);
                }
            }
        }

        if !closed_ids.is_empty() {
            self.readers
                .lock()
                .retain(|slot| !closed_ids.contains(&slot.id));
        }
    }

    /// Number of registered reader subscriptions.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }
}
