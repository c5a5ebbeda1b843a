//! Latest-snapshot cache plus the per-tick change notification.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::types::MetricsSnapshot;

const NOTIFY_CAPACITY: usize = 16;

/// Single shared cell written by the sampler, read by everyone else.
#[derive(Debug)]
pub struct MetricsCache {
    latest: RwLock<Arc<MetricsSnapshot>>,
    tx: broadcast::Sender<Arc<MetricsSnapshot>>,
}

impl MetricsCache {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            latest: RwLock::new(Arc::new(MetricsSnapshot::default())),
            tx,
        }
    }

    /// Most recent snapshot; never blocks on I/O.
    pub fn get_latest(&self) -> Arc<MetricsSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the cached snapshot, then notifies outside the lock.
    pub fn publish(&self, snapshot: MetricsSnapshot) -> Arc<MetricsSnapshot> {
        let snapshot = Arc::new(snapshot);
        {
            let mut slot = self.latest.write().unwrap_or_else(PoisonError::into_inner);
            *slot = snapshot.clone();
        }
        // no receivers is fine
        let _ = self.tx.send(snapshot.clone());
        snapshot
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MetricsSnapshot>> {
        self.tx.subscribe()
    }
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new()
    }
}
