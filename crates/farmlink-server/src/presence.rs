//! Presence broadcaster.
//!
//! Pairs every registry mutation with a broadcast of the snapshot that the
//! mutation produced. Delivery is fire-and-forget; a client that misses a
//! broadcast heals on the next one or with an explicit refresh request.

use std::sync::Arc;

use farmlink_shared::UserId;
use tracing::{debug, info};

use crate::registry::{ConnectionHandle, ConnectionRegistry, RegistrySnapshot};

#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Register a freshly handshaken connection and announce it.
    pub fn connect(&self, identity: &UserId, handle: ConnectionHandle) -> RegistrySnapshot {
        let conn_id = handle.id();
        let snapshot = self.registry.register(identity, handle);
        info!(
            user = %identity,
            conn = conn_id,
            online = snapshot.online.len(),
            version = snapshot.version,
            "User online"
        );
        self.broadcast(&snapshot);
        snapshot
    }

    /// Drop a closed connection and announce it if it was still current.
    pub fn disconnect(
        &self,
        identity: &UserId,
        handle: &ConnectionHandle,
    ) -> Option<RegistrySnapshot> {
        let snapshot = self.registry.unregister(identity, handle)?;
        info!(
            user = %identity,
            conn = handle.id(),
            online = snapshot.online.len(),
            version = snapshot.version,
            "User offline"
        );
        self.broadcast(&snapshot);
        Some(snapshot)
    }

    /// Answer a client's refresh request by broadcasting the current
    /// snapshot to everyone, the requesting socket included even when it is
    /// no longer the registered one for its identity.
    pub fn refresh(&self, requester: &ConnectionHandle) -> RegistrySnapshot {
        let snapshot = self.registry.snapshot();
        self.broadcast(&snapshot);
        if !snapshot.connections.iter().any(|c| c.same_as(requester)) {
            if let Err(e) = requester.push(snapshot.to_event()) {
                debug!(conn = requester.id(), error = %e, "Dropping presence reply");
            }
        }
        snapshot
    }

    /// Returns the number of connections the event was queued on.
    fn broadcast(&self, snapshot: &RegistrySnapshot) -> usize {
        let event = snapshot.to_event();
        let mut delivered = 0;
        for conn in &snapshot.connections {
            match conn.push(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    conn = conn.id(),
                    version = snapshot.version,
                    error = %e,
                    "Dropping presence snapshot"
                ),
            }
        }
        delivered
    }
}
