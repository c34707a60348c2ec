//! The per-session "room": a bounded fan-out channel plus the set of
//! connection identifiers currently joined to it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::broadcast;

/// Output frames are capped at this many in-flight messages per room. A
/// subscriber that falls behind observes `RecvError::Lagged` rather than
/// blocking the reader loop indefinitely.
const ROOM_CHANNEL_CAPACITY: usize = 1024;

pub type ConnectionId = u64;

/// A connection identifier source, one per transport (shared across rooms).
#[derive(Debug, Default)]
pub struct ConnectionIdAllocator(AtomicU64);

impl ConnectionIdAllocator {
    pub fn next(&self) -> ConnectionId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct Room {
    tx: broadcast::Sender<Bytes>,
    members: Mutex<HashSet<ConnectionId>>,
}

impl Room {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            tx,
            members: Mutex::new(HashSet::new()),
        }
    }

    /// Join the room, returning a receiver for subsequent output frames.
    pub fn join(&self, conn: ConnectionId) -> broadcast::Receiver<Bytes> {
        self.members.lock().unwrap().insert(conn);
        self.tx.subscribe()
    }

    pub fn leave(&self, conn: ConnectionId) {
        self.members.lock().unwrap().remove(&conn);
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    /// Fan a frame out to every current subscriber. Returns the number of
    /// receivers the broadcast was delivered to (0 if the room is empty -
    /// this is not an error, output is simply dropped when nobody is
    /// listening).
    pub fn emit(&self, frame: Bytes) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}
