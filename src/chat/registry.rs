use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

use super::events::ServerEvent;

/// Opaque handle for one live socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    tx: mpsc::Sender<ServerEvent>,
    external_id: Option<String>,
    last_active: Instant,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    // at most one live handle per identity
    bound: HashMap<String, ConnectionId>,
    // identities whose socket closed, with the time it closed
    detached: HashMap<String, Instant>,
}

/// Maps live connection handles to the identities registered on them.
pub struct Registry {
    inner: Mutex<Inner>,
    send_queue: usize,
}

impl Registry {
    pub fn new(send_queue: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            send_queue,
        }
    }

    /// Track a freshly accepted socket. It stays anonymous until [`bind`](Self::bind).
    pub async fn open(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let handle = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.send_queue);
        self.inner.lock().await.connections.insert(handle, Connection {
            tx,
            external_id: None,
            last_active: Instant::now(),
        });
        (handle, rx)
    }

    /// Attach `external_id` to `handle`. Returns the handle it superseded, if
    /// any, or `None` when `handle` is no longer open.
    pub async fn bind(
        &self,
        handle: ConnectionId,
        external_id: &str,
    ) -> Option<Option<ConnectionId>> {
        let mut inner = self.inner.lock().await;
        let connection = inner.connections.get_mut(&handle)?;
        connection.external_id = Some(external_id.to_owned());
        connection.last_active = Instant::now();

        inner.detached.remove(external_id);
        let previous = inner.bound.insert(external_id.to_owned(), handle)
            .filter(|previous| *previous != handle);

        if let Some(previous) = previous {
            if let Some(stale) = inner.connections.get_mut(&previous) {
                stale.external_id = None;
            }
        }

        Some(previous)
    }

    pub async fn resolve(&self, handle: ConnectionId) -> Option<String> {
        self.inner.lock().await
            .connections
            .get(&handle)
            .and_then(|connection| connection.external_id.clone())
    }

    /// Refresh liveness for `handle`, returning the identity bound to it.
    pub async fn touch(&self, handle: ConnectionId) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let connection = inner.connections.get_mut(&handle)?;
        connection.last_active = Instant::now();
        connection.external_id.clone()
    }

    /// Detach the identity bound to `handle` while keeping the socket open.
    pub async fn release(&self, handle: ConnectionId) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let external_id = inner.connections.get_mut(&handle)?.external_id.take()?;
        detach(&mut inner, handle, external_id)
    }

    /// Forget a closed socket. Returns the identity if `handle` was its
    /// current connection; that identity is then remembered as detached.
    pub async fn unbind(&self, handle: ConnectionId) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let external_id = inner.connections.remove(&handle)?.external_id?;
        detach(&mut inner, handle, external_id)
    }

    /// The open socket `external_id` is currently bound to.
    pub async fn handle_of(&self, external_id: &str) -> Option<ConnectionId> {
        let inner = self.inner.lock().await;
        inner.bound.get(external_id)
            .copied()
            .filter(|handle| {
                inner.connections.get(handle).is_some_and(|connection| !connection.tx.is_closed())
            })
    }

    pub async fn is_live(&self, external_id: &str) -> bool {
        self.handle_of(external_id).await.is_some()
    }

    pub async fn send_to(&self, handle: ConnectionId, event: ServerEvent) -> bool {
        let tx = match self.inner.lock().await.connections.get(&handle) {
            Some(connection) => connection.tx.clone(),
            None => return false,
        };
        deliver(handle, &tx, event)
    }

    /// Push `event` to whichever socket `external_id` is live on. Returns
    /// false when the identity has no reachable connection.
    pub async fn send_to_user(&self, external_id: &str, event: ServerEvent) -> bool {
        let target = {
            let inner = self.inner.lock().await;
            inner.bound.get(external_id)
                .and_then(|handle| inner.connections.get(handle).map(|c| (*handle, c.tx.clone())))
        };

        match target {
            Some((handle, tx)) => deliver(handle, &tx, event),
            None => false,
        }
    }

    /// Drop every connection idle for longer than `threshold`, plus detached
    /// identities older than it. Dropping a connection closes its socket.
    /// Returns the identities whose sessions must be unwound.
    pub async fn evict_stale(&self, threshold: Duration) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let stale: Vec<ConnectionId> = inner.connections.iter()
            .filter(|(_, connection)| now.duration_since(connection.last_active) > threshold)
            .map(|(handle, _)| *handle)
            .collect();

        let mut evicted = Vec::new();
        for handle in stale {
            let removed = inner.connections.remove(&handle);
            let Some(Connection { external_id: Some(external_id), .. }) = removed else {
                continue;
            };
            if inner.bound.get(&external_id) == Some(&handle) {
                inner.bound.remove(&external_id);
                evicted.push(external_id);
            }
        }

        let expired: Vec<String> = inner.detached.iter()
            .filter(|(_, since)| now.duration_since(**since) > threshold)
            .map(|(external_id, _)| external_id.clone())
            .collect();
        for external_id in expired {
            inner.detached.remove(&external_id);
            evicted.push(external_id);
        }

        evicted
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }
}

fn detach(inner: &mut Inner, handle: ConnectionId, external_id: String) -> Option<String> {
    if inner.bound.get(&external_id) != Some(&handle) {
        return None;
    }
    inner.bound.remove(&external_id);
    inner.detached.insert(external_id.clone(), Instant::now());
    Some(external_id)
}

fn deliver(handle: ConnectionId, tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(%handle, "send queue full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_resolve() {
        let registry = Registry::new(8);
        let (handle, _rx) = registry.open().await;

        assert_eq!(registry.resolve(handle).await, None);
        assert_eq!(registry.bind(handle, "alice").await, Some(None));
        assert_eq!(registry.resolve(handle).await.as_deref(), Some("alice"));
        assert_eq!(registry.handle_of("alice").await, Some(handle));
        assert!(registry.is_live("alice").await);
    }

    #[tokio::test]
    async fn binding_again_supersedes_old_handle() {
        let registry = Registry::new(8);
        let (old, mut old_rx) = registry.open().await;
        let (new, mut new_rx) = registry.open().await;

        registry.bind(old, "alice").await;
        assert_eq!(registry.bind(new, "alice").await, Some(Some(old)));

        assert_eq!(registry.resolve(old).await, None);
        assert!(registry.send_to_user("alice", ServerEvent::Searching).await);
        assert_eq!(new_rx.try_recv().ok(), Some(ServerEvent::Searching));
        assert!(old_rx.try_recv().is_err());

        // the superseded socket closing must not detach the identity
        assert_eq!(registry.unbind(old).await, None);
        assert!(registry.is_live("alice").await);
    }

    #[tokio::test]
    async fn bind_on_closed_handle_fails() {
        let registry = Registry::new(8);
        let (handle, _rx) = registry.open().await;
        registry.unbind(handle).await;

        assert_eq!(registry.bind(handle, "alice").await, None);
        assert!(!registry.is_live("alice").await);
    }

    #[tokio::test]
    async fn release_keeps_socket_open() {
        let registry = Registry::new(8);
        let (handle, _rx) = registry.open().await;
        registry.bind(handle, "alice").await;

        assert_eq!(registry.release(handle).await.as_deref(), Some("alice"));
        assert_eq!(registry.resolve(handle).await, None);
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.send_to(handle, ServerEvent::Searching).await);
    }

    #[tokio::test]
    async fn unbind_reports_identity() {
        let registry = Registry::new(8);
        let (handle, _rx) = registry.open().await;
        registry.bind(handle, "alice").await;

        assert_eq!(registry.unbind(handle).await.as_deref(), Some("alice"));
        assert!(!registry.is_live("alice").await);
        assert!(!registry.send_to_user("alice", ServerEvent::Searching).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_idle_connections_and_detached_identities() {
        let registry = Registry::new(8);
        let (idle, mut idle_rx) = registry.open().await;
        let (busy, _busy_rx) = registry.open().await;
        let (gone, _gone_rx) = registry.open().await;
        registry.bind(idle, "idle").await;
        registry.bind(busy, "busy").await;
        registry.bind(gone, "gone").await;
        registry.unbind(gone).await;

        tokio::time::advance(Duration::from_secs(301)).await;
        registry.touch(busy).await;

        let mut evicted = registry.evict_stale(Duration::from_secs(300)).await;
        evicted.sort();
        assert_eq!(evicted, vec!["gone".to_owned(), "idle".to_owned()]);

        assert!(registry.is_live("busy").await);
        assert!(!registry.is_live("idle").await);
        // sender dropped, so the socket writer sees the channel close
        assert!(matches!(idle_rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
        assert!(registry.evict_stale(Duration::from_secs(300)).await.is_empty());
    }
}
