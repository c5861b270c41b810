//! Shared registry of live WebSocket peers.

use std::sync::Arc;

use dashmap::DashMap;

use super::session::WsPeer;
use super::Message;

/// Keyed handles to open connections, shared by every session.
///
/// Each operation is individually atomic. Sessions remove their own keys
/// when they end.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    peers: Arc<DashMap<String, WsPeer>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `peer` under `key`, returning whatever was there before.
    pub fn store(&self, key: impl Into<String>, peer: WsPeer) -> Option<WsPeer> {
        self.peers.insert(key.into(), peer)
    }

    pub fn load(&self, key: &str) -> Option<WsPeer> {
        self.peers.get(key).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, key: &str) -> Option<WsPeer> {
        self.peers.remove(key).map(|(_, peer)| peer)
    }

    /// Removes `key` only if it still maps to `peer`.
    pub(crate) fn delete_if_same(&self, key: &str, peer: &WsPeer) {
        self.peers.remove_if(key, |_, current| current.same_peer(peer));
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// A point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<(String, WsPeer)> {
        self.peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Queues `msg` to every registered peer. Returns how many accepted it.
    pub fn broadcast(&self, msg: &Message) -> usize {
        self.snapshot()
            .into_iter()
            .filter(|(_, peer)| peer.send(msg.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn concurrent_store_load_delete() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{t}-{i}");
                        let (peer, _rx) = WsPeer::detached();
                        registry.store(key.clone(), peer);
                        assert!(registry.load(&key).is_some());
                        if i % 2 == 0 {
                            registry.delete(&key);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
    }

    #[test]
    fn delete_if_same_keeps_a_replacement() {
        let registry = ConnectionRegistry::new();
        let (old, _old_rx) = WsPeer::detached();
        let (new, _new_rx) = WsPeer::detached();
        registry.store("alice", old.clone());
        registry.store("alice", new);
        registry.delete_if_same("alice", &old);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_skips_closed_peers() {
        let registry = ConnectionRegistry::new();
        let (open, mut rx) = WsPeer::detached();
        let (closed, _closed_rx) = WsPeer::detached();
        closed.close();
        registry.store("open", open);
        registry.store("closed", closed);
        assert_eq!(registry.broadcast(&Message::text("hello")), 1);
        assert_eq!(rx.try_recv().unwrap(), Message::text("hello"));
    }
}
