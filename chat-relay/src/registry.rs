//! Shared set of named, writable peers.
//!
//! The registry is the only mutable state shared between sessions. One
//! async mutex guards membership changes and fan-out alike, so a broadcast
//! never observes a peer halfway through removal.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{Mutex, MutexGuard};

pub type PeerId = u64;

pub struct PeerRegistry<W> {
    peers: Mutex<BTreeMap<PeerId, W>>,
    next_id: AtomicU64,
}

impl<W> Default for PeerRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> PeerRegistry<W> {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates an identity for a freshly accepted connection.
    pub fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers the write half of a named connection.
    ///
    /// Ids are unique per process, so a collision means the caller reused an
    /// id; the writer is handed back untouched.
    pub async fn add(&self, id: PeerId, writer: W) -> Result<(), W> {
        let mut peers = self.peers.lock().await;
        match peers.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(writer);
                Ok(())
            }
            Entry::Occupied(_) => Err(writer),
        }
    }

    /// Removes a peer and returns its writer. Unknown ids are a no-op.
    pub async fn remove(&self, id: PeerId) -> Option<W> {
        self.peers.lock().await.remove(&id)
    }

    pub async fn snapshot(&self) -> Vec<PeerId> {
        self.peers.lock().await.keys().copied().collect()
    }

    pub async fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Exclusive access for the relay's fan-out critical section.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, BTreeMap<PeerId, W>> {
        self.peers.lock().await
    }
}
