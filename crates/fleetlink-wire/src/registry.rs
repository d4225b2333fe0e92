//! Peer registry — thread-safe directory of live sessions.
//!
//! Keyed by peer id (the remote socket address). The Agent holds at most
//! one entry (its bound Center); the Center holds one per connected Agent.
//! Constructed at role startup and passed by reference — no globals.

use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe `peer_id -> Session` map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its own peer id.
    pub fn insert(&self, session: Arc<Session>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(session.peer_id().to_string(), session);
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<Session>> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(peer_id).cloned()
    }

    pub fn remove(&self, peer_id: &str) -> Option<Arc<Session>> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(peer_id)
    }

    /// Snapshot of all live sessions. Iterating the snapshot is safe to
    /// combine with `insert`/`remove` on the same registry.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().cloned().collect()
    }

    /// Peer ids of all live sessions.
    pub fn peer_ids(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
