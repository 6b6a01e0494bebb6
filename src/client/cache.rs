//! Names of other clients, learned from Login and NameId frames.
//!
//! Only used to annotate console output; the server stays authoritative.

use crate::protocol::Name;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: u8,
    pub name: Name,
}

#[derive(Debug, Default)]
pub struct PeerCache {
    peers: BTreeMap<u8, PeerEntry>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`, returning the previous one.
    pub fn insert(&mut self, id: u8, name: Name) -> Option<PeerEntry> {
        self.peers.insert(id, PeerEntry { id, name })
    }

    pub fn remove(&mut self, id: u8) -> Option<PeerEntry> {
        self.peers.remove(&id)
    }

    pub fn get(&self, id: u8) -> Option<&PeerEntry> {
        self.peers.get(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
