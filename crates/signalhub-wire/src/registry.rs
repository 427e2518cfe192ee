//! Client registry: tracks connected clients and the peer links between them.
//!
//! The [`Registry`] maps client names to live [`Client`]s and records which
//! pairs are linked for negotiation. Both tables sit behind one lock, so a
//! link is always observed from both sides or from neither, and removing a
//! client drops its link in the same step.

use crate::client::Client;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Why a link request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The requested partner is not connected.
    #[error("Client not found: {0}")]
    NotFound(String),
    /// The requesting client has already left.
    #[error("Caller no longer registered: {0}")]
    CallerGone(String),
    /// A client asked to link with itself.
    #[error("Client cannot link with itself: {0}")]
    SelfLink(String),
}

#[derive(Debug, Default)]
struct RegistryInner {
    clients: HashMap<String, Arc<Client>>,
    /// Symmetric: `links[a] == b` iff `links[b] == a`.
    links: HashMap<String, String>,
}

impl RegistryInner {
    /// Remove `name`'s link from both sides. Returns the former partner.
    fn dissolve(&mut self, name: &str) -> Option<String> {
        let peer = self.links.remove(name)?;
        if self.links.get(&peer).map(String::as_str) == Some(name) {
            self.links.remove(&peer);
        }
        Some(peer)
    }
}

/// Thread-safe registry of connected clients.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a client unconditionally. The caller guarantees the name is
    /// unique; a displaced entry is returned.
    pub fn add(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let mut inner = self.write();
        inner.clients.insert(client.name().to_string(), client)
    }

    /// Insert a client unless its name is already taken.
    pub fn try_add(&self, client: Arc<Client>) -> Result<(), crate::RelayError> {
        let mut inner = self.write();
        if inner.clients.contains_key(client.name()) {
            return Err(crate::RelayError::DuplicateName(client.name().to_string()));
        }
        inner.clients.insert(client.name().to_string(), client);
        Ok(())
    }

    /// Remove a client and any link it holds. Absent names are a no-op.
    pub fn remove(&self, name: &str) -> Option<Arc<Client>> {
        let mut inner = self.write();
        inner.dissolve(name);
        inner.clients.remove(name)
    }

    /// Whether a client with this name is connected.
    pub fn has(&self, name: &str) -> bool {
        self.read().clients.contains_key(name)
    }

    /// Look up a connected client.
    pub fn get(&self, name: &str) -> Option<Arc<Client>> {
        self.read().clients.get(name).cloned()
    }

    /// Names of all connected clients, in join order.
    pub fn list_names(&self) -> Vec<String> {
        let inner = self.read();
        let mut clients: Vec<&Arc<Client>> = inner.clients.values().collect();
        clients.sort_by_key(|c| c.seq());
        clients.iter().map(|c| c.name().to_string()).collect()
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Link `caller` and `target` with each other.
    ///
    /// Any link either side held before is dissolved first, leaving the former
    /// partners unlinked.
    pub fn link(&self, caller: &str, target: &str) -> Result<(), LinkError> {
        if caller == target {
            return Err(LinkError::SelfLink(caller.to_string()));
        }

        let mut inner = self.write();
        if !inner.clients.contains_key(target) {
            return Err(LinkError::NotFound(target.to_string()));
        }
        if !inner.clients.contains_key(caller) {
            return Err(LinkError::CallerGone(caller.to_string()));
        }

        inner.dissolve(caller);
        inner.dissolve(target);
        inner.links.insert(caller.to_string(), target.to_string());
        inner.links.insert(target.to_string(), caller.to_string());
        Ok(())
    }

    /// Dissolve `name`'s link, if any. Returns the former partner.
    pub fn unlink(&self, name: &str) -> Option<String> {
        self.write().dissolve(name)
    }

    /// Dissolve `name`'s link only if it is still linked with `expected`.
    ///
    /// Returns whether a link was dissolved. A link formed after the caller
    /// looked up `expected` is left alone.
    pub fn unlink_if(&self, name: &str, expected: &str) -> bool {
        let mut inner = self.write();
        if inner.links.get(name).map(String::as_str) != Some(expected) {
            return false;
        }
        inner.dissolve(name);
        true
    }

    /// The client `name` is linked with.
    pub fn peer_of(&self, name: &str) -> Option<Arc<Client>> {
        let inner = self.read();
        let peer = inner.links.get(name)?;
        inner.clients.get(peer).cloned()
    }

    /// Name of the client `name` is linked with.
    pub fn peer_name_of(&self, name: &str) -> Option<String> {
        self.read().links.get(name).cloned()
    }

    /// Number of linked pairs.
    pub fn link_count(&self) -> usize {
        self.read().links.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Outbound;
    use tokio::sync::mpsc;

    fn make_client(seq: u64) -> (Arc<Client>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Client::new(format!("Client{seq}"), seq, tx)), rx)
    }

    fn populated(n: u64) -> (Registry, Vec<mpsc::Receiver<Outbound>>) {
        let registry = Registry::new();
        let mut receivers = Vec::new();
        for seq in 0..n {
            let (client, rx) = make_client(seq);
            registry.add(client);
            receivers.push(rx);
        }
        (registry, receivers)
    }

    fn assert_symmetric(registry: &Registry) {
        for name in registry.list_names() {
            if let Some(peer) = registry.peer_name_of(&name) {
                assert_eq!(
                    registry.peer_name_of(&peer).as_deref(),
                    Some(name.as_str()),
                    "{name} -> {peer} is not mirrored"
                );
            }
        }
    }

    #[test]
    fn test_add_get_has() {
        let (registry, _rx) = populated(1);
        assert!(registry.has("Client0"));
        assert!(!registry.has("client0"));
        assert_eq!(registry.get("Client0").unwrap().seq(), 0);
        assert!(registry.get("Client9").is_none());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (registry, _rx) = populated(2);
        assert!(registry.remove("Client5").is_none());
        assert!(registry.remove("Client1").is_some());
        assert!(registry.remove("Client1").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_try_add_rejects_duplicate() {
        let (registry, _rx) = populated(1);
        let (dup, _dup_rx) = make_client(0);
        match registry.try_add(dup) {
            Err(crate::RelayError::DuplicateName(name)) => assert_eq!(name, "Client0"),
            other => panic!("Expected DuplicateName, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_names_in_join_order() {
        let (registry, _rx) = populated(12);
        let names = registry.list_names();
        assert_eq!(names.len(), 12);
        assert_eq!(names[2], "Client2");
        assert_eq!(names[10], "Client10");
    }

    #[test]
    fn test_membership_after_churn() {
        let (registry, _rx) = populated(10);
        for gone in [1, 4, 7] {
            registry.remove(&format!("Client{gone}"));
        }
        let names = registry.list_names();
        assert_eq!(names.len(), 7);
        for survivor in [0, 2, 3, 5, 6, 8, 9] {
            assert!(names.contains(&format!("Client{survivor}")));
        }
    }

    #[test]
    fn test_link_is_symmetric() {
        let (registry, _rx) = populated(2);
        registry.link("Client1", "Client0").unwrap();
        assert_eq!(registry.peer_name_of("Client0").as_deref(), Some("Client1"));
        assert_eq!(registry.peer_of("Client1").unwrap().name(), "Client0");
        assert_eq!(registry.link_count(), 1);
    }

    #[test]
    fn test_link_errors() {
        let (registry, _rx) = populated(1);
        assert_eq!(
            registry.link("Client0", "Client0"),
            Err(LinkError::SelfLink("Client0".to_string()))
        );
        assert_eq!(
            registry.link("Client0", "Client3"),
            Err(LinkError::NotFound("Client3".to_string()))
        );
        assert_eq!(
            registry.link("Client7", "Client0"),
            Err(LinkError::CallerGone("Client7".to_string()))
        );
        assert_eq!(registry.link_count(), 0);
    }

    #[test]
    fn test_relink_releases_former_partners() {
        let (registry, _rx) = populated(4);
        registry.link("Client0", "Client1").unwrap();
        registry.link("Client2", "Client3").unwrap();

        registry.link("Client0", "Client2").unwrap();
        assert_eq!(registry.peer_name_of("Client0").as_deref(), Some("Client2"));
        assert!(registry.peer_name_of("Client1").is_none());
        assert!(registry.peer_name_of("Client3").is_none());
        assert_eq!(registry.link_count(), 1);
        assert_symmetric(&registry);
    }

    #[test]
    fn test_remove_drops_link() {
        let (registry, _rx) = populated(2);
        registry.link("Client0", "Client1").unwrap();
        registry.remove("Client1");
        assert!(registry.peer_of("Client0").is_none());
        assert!(registry.peer_name_of("Client0").is_none());
        assert_eq!(registry.link_count(), 0);
    }

    #[test]
    fn test_unlink() {
        let (registry, _rx) = populated(2);
        registry.link("Client0", "Client1").unwrap();
        assert_eq!(registry.unlink("Client1").as_deref(), Some("Client0"));
        assert!(registry.peer_name_of("Client0").is_none());
        assert!(registry.unlink("Client1").is_none());
    }

    #[test]
    fn test_unlink_if_keeps_newer_link() {
        let (registry, _rx) = populated(3);
        registry.link("Client0", "Client1").unwrap();
        // Client2 takes over Client0 after Client1 was looked up.
        registry.link("Client2", "Client0").unwrap();

        assert!(!registry.unlink_if("Client0", "Client1"));
        assert_eq!(registry.peer_name_of("Client0").as_deref(), Some("Client2"));
        assert_eq!(registry.peer_name_of("Client2").as_deref(), Some("Client0"));

        assert!(registry.unlink_if("Client0", "Client2"));
        assert!(registry.peer_name_of("Client2").is_none());
        assert_eq!(registry.link_count(), 0);
        assert_symmetric(&registry);
    }

    #[test]
    fn test_concurrent_links_stay_symmetric() {
        let (registry, _rx) = populated(16);
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for round in 0..200u64 {
                        let target = (i + 1 + round % 15) % 16;
                        let _ = registry.link(&format!("Client{i}"), &format!("Client{target}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_symmetric(&registry);
    }

    #[test]
    fn test_disjoint_concurrent_links_all_succeed() {
        let (registry, _rx) = populated(32);
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.link(&format!("Client{}", 2 * i), &format!("Client{}", 2 * i + 1))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
        assert_eq!(registry.link_count(), 16);
        assert_symmetric(&registry);
    }
}
