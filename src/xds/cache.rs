//! Per-node snapshot cache.
//!
//! Maps node-id to the latest published snapshot and fans publication out to
//! subscribed discovery streams over a broadcast channel. The reconciler is
//! the only writer; discovery streams are the readers. Today a deployment
//! publishes under the single node-id given at startup, but the key type
//! already allows multi-tenancy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::store::Snapshot;

const UPDATE_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
    update_tx: broadcast::Sender<String>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self { snapshots: RwLock::new(HashMap::new()), update_tx }
    }

    /// Publish a snapshot for a node and notify its subscribers.
    pub fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        debug!(
            node_id,
            version = %snapshot.version(),
            resources = snapshot.total_resources(),
            "set snapshot"
        );
        self.snapshots.write().insert(node_id.to_string(), Arc::clone(&snapshot));

        // No receiver yet is fine; streams catch up from the map on connect.
        let _ = self.update_tx.send(node_id.to_string());
    }

    pub fn get_snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.read().get(node_id).cloned()
    }

    /// Subscribe to publication events; the payload is the node-id whose
    /// snapshot changed.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.update_tx.subscribe()
    }

    pub fn node_count(&self) -> usize {
        self.snapshots.read().len()
    }
}
