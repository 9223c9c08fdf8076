//! Connection registry: the authoritative identity -> connection map.
//!
//! One entry per identity. Registering again for the same identity replaces
//! the previous handle and signals it as superseded so its socket can be
//! closed; unregistering only removes the entry if it still holds the exact
//! handle being closed. Every mutation bumps a version
//! counter and returns the snapshot taken under the same lock, so a
//! broadcast always reflects a state the registry actually passed through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use farmlink_shared::protocol::{PresenceSnapshot, ServerEvent};
use farmlink_shared::UserId;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("connection queue is full")]
    Full,

    #[error("connection is closed")]
    Closed,
}

struct ConnectionInner {
    id: u64,
    tx: mpsc::Sender<ServerEvent>,
    superseded: Notify,
}

/// Sending half of one live socket. Cheap to clone; clones compare equal
/// with [`ConnectionHandle::same_as`].
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its socket writer drains.
    pub fn new(queue: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                tx,
                superseded: Notify::new(),
            }),
        };
        (handle, rx)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Reference equality: true only for clones of the same connection.
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue an event without waiting. A slow or gone socket loses the event.
    pub fn push(&self, event: ServerEvent) -> Result<(), PushError> {
        self.inner.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tx.is_closed()
    }

    /// Resolves once a newer connection has taken this handle's registry
    /// entry. The signal is kept until awaited.
    pub async fn superseded(&self) {
        self.inner.superseded.notified().await
    }

    fn supersede(&self) {
        self.inner.superseded.notify_one();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Registry state at one instant: who is online and which connections
/// should hear about it.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub online: Vec<UserId>,
    pub connections: Vec<ConnectionHandle>,
}

impl RegistrySnapshot {
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::PresenceSnapshot(PresenceSnapshot {
            version: self.version,
            online_users: self.online.clone(),
        })
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<UserId, ConnectionHandle>,
    version: u64,
}

impl RegistryInner {
    fn snapshot(&self) -> RegistrySnapshot {
        let mut online: Vec<UserId> = self.entries.keys().cloned().collect();
        online.sort();
        RegistrySnapshot {
            version: self.version,
            online,
            connections: self.entries.values().cloned().collect(),
        }
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // The map stays consistent even if a holder panicked: every mutation
        // is a single insert/remove.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map `identity` to `handle`, replacing and superseding any previous
    /// connection.
    pub fn register(&self, identity: &UserId, handle: ConnectionHandle) -> RegistrySnapshot {
        let mut inner = self.lock();
        let conn_id = handle.id();
        if let Some(previous) = inner.entries.insert(identity.clone(), handle) {
            debug!(
                user = %identity,
                old_conn = previous.id(),
                new_conn = conn_id,
                "Connection replaced"
            );
            previous.supersede();
        }
        inner.version += 1;
        inner.snapshot()
    }

    /// Remove `identity` only if it still maps to `handle`. Returns `None`
    /// when nothing changed.
    pub fn unregister(
        &self,
        identity: &UserId,
        handle: &ConnectionHandle,
    ) -> Option<RegistrySnapshot> {
        let mut inner = self.lock();
        let is_current = match inner.entries.get(identity) {
            Some(current) if current.same_as(handle) => true,
            Some(current) => {
                debug!(
                    user = %identity,
                    closing_conn = handle.id(),
                    current_conn = current.id(),
                    "Ignoring unregister for superseded connection"
                );
                false
            }
            None => false,
        };
        if !is_current {
            return None;
        }

        inner.entries.remove(identity);
        inner.version += 1;
        Some(inner.snapshot())
    }

    pub fn lookup(&self, identity: &UserId) -> Option<ConnectionHandle> {
        self.lock().entries.get(identity).cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    #[test]
    fn test_last_register_wins() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..5).map(|_| ConnectionHandle::new(4).0).collect();

        for h in &handles {
            registry.register(&uid("x"), h.clone());
        }

        assert_eq!(registry.len(), 1);
        let current = registry.lookup(&uid("x")).unwrap();
        assert!(current.same_as(&handles[4]));
        for h in &handles[..4] {
            assert!(!current.same_as(h));
        }
    }

    #[tokio::test]
    async fn test_replaced_handle_is_signalled() {
        let registry = ConnectionRegistry::new();
        let (old, _rx_old) = ConnectionHandle::new(4);
        let (new, _rx_new) = ConnectionHandle::new(4);

        registry.register(&uid("x"), old.clone());
        registry.register(&uid("x"), new.clone());

        let wait = Duration::from_millis(100);
        assert!(timeout(wait, old.superseded()).await.is_ok());
        assert!(timeout(wait, new.superseded()).await.is_err());
    }

    #[test]
    fn test_stale_unregister_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::new(4);
        let (b, _rx_b) = ConnectionHandle::new(4);

        registry.register(&uid("x"), a.clone());
        let after_b = registry.register(&uid("x"), b.clone());

        assert!(registry.unregister(&uid("x"), &a).is_none());
        assert!(registry.lookup(&uid("x")).unwrap().same_as(&b));
        assert_eq!(registry.snapshot().version, after_b.version);

        assert!(registry.unregister(&uid("x"), &b).is_some());
        assert!(registry.lookup(&uid("x")).is_none());
        assert!(registry.unregister(&uid("x"), &b).is_none());
    }

    #[test]
    fn test_snapshot_matches_keys_after_each_mutation() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = ConnectionHandle::new(4);
        let (b, _rb) = ConnectionHandle::new(4);

        let s1 = registry.register(&uid("b-user"), b.clone());
        assert_eq!(s1.online, vec![uid("b-user")]);

        let s2 = registry.register(&uid("a-user"), a.clone());
        assert_eq!(s2.online, vec![uid("a-user"), uid("b-user")]);
        assert_eq!(s2.connections.len(), 2);
        assert!(s2.version > s1.version);

        let s3 = registry.unregister(&uid("b-user"), &b).unwrap();
        assert_eq!(s3.online, vec![uid("a-user")]);
        assert_eq!(registry.snapshot().online, s3.online);
        assert!(s3.version > s2.version);
    }

    #[test]
    fn test_push_reports_full_and_closed() {
        let (handle, rx) = ConnectionHandle::new(1);
        let event = ConnectionRegistry::new().snapshot().to_event();

        assert!(handle.push(event.clone()).is_ok());
        assert_eq!(handle.push(event.clone()), Err(PushError::Full));

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.push(event), Err(PushError::Closed));
    }

    #[test]
    fn test_concurrent_connect_storm_keeps_one_entry_per_identity() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut threads = Vec::new();

        for t in 0..8 {
            let registry = registry.clone();
            threads.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let id = uid(&format!("user-{}", i % 10));
                    let (h, _rx) = ConnectionHandle::new(1);
                    registry.register(&id, h.clone());
                    if (i + t) % 3 == 0 {
                        registry.unregister(&id, &h);
                    }
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        let snap = registry.snapshot();
        assert_eq!(snap.online.len(), registry.len());
        assert_eq!(snap.connections.len(), snap.online.len());
        assert!(snap.online.len() <= 10);
    }
}
