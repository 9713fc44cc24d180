use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Millis;
use crate::room::ClientId;

/// Admin-side set of listeners believed present in the room.
///
/// Membership is best-effort: a listener that vanishes without a `leave`
/// stays counted unless idle eviction is switched on.
#[derive(Debug)]
pub struct ClientRegistry {
    /// Client id to last time it was heard from.
    clients: HashMap<ClientId, Millis>,
    count: watch::Sender<usize>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            clients: HashMap::new(),
            count,
        }
    }

    /// Returns `true` when `id` was not registered before.
    pub fn register(&mut self, id: &ClientId, now: Millis) -> bool {
        let added = self.clients.insert(id.clone(), now).is_none();
        if added {
            self.publish_count();
        }
        added
    }

    /// Returns `true` when `id` was registered.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        let removed = self.clients.remove(id).is_some();
        if removed {
            self.publish_count();
        }
        removed
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Observable listener count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Drops every client not heard from within `timeout` of `now`.
    pub fn evict_idle(&mut self, now: Millis, timeout: Duration) -> Vec<ClientId> {
        let cutoff = now - timeout.as_millis() as Millis;
        let stale: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, seen)| **seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.clients.remove(id);
        }
        if !stale.is_empty() {
            self.publish_count();
        }
        stale
    }

    fn publish_count(&self) {
        self.count.send_replace(self.clients.len());
    }
}
