//! The connection manager: the
//! `id -> connection`, `endpoint-path -> set<id>`, and `group-name ->
//! set<id>` indexes, plus broadcast/send/close-by-id operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::ws::Message;
use tracing::debug;

use mockd_core::group_index::GroupIndex;

use crate::connection::{Connection, ConnectionId};

#[derive(Default)]
pub struct ConnectionManager {
    by_id: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    by_endpoint: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    pub(crate) groups: GroupIndex<ConnectionId>,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, conn: Arc<Connection>) {
        self.by_endpoint
            .lock()
            .unwrap()
            .entry(conn.endpoint_path.clone())
            .or_default()
            .insert(conn.id);
        self.by_id.lock().unwrap().insert(conn.id, conn);
    }

    /// Remove a connection and purge it from every group in one
    /// critical section.
    pub fn remove(&self, id: ConnectionId) {
        let conn = self.by_id.lock().unwrap().remove(&id);
        if let Some(conn) = conn {
            self.by_endpoint
                .lock()
                .unwrap()
                .get_mut(&conn.endpoint_path)
                .map(|set| set.remove(&id));
        }
        self.groups.purge(&id);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.by_id.lock().unwrap().get(&id).cloned()
    }

    pub fn count_for_endpoint(&self, path: &str) -> usize {
        self.by_endpoint
            .lock()
            .unwrap()
            .get(path)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn ids_for_endpoint(&self, path: &str) -> Vec<ConnectionId> {
        self.by_endpoint
            .lock()
            .unwrap()
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.by_id.lock().unwrap().keys().cloned().collect()
    }

    /// Join `group` from the manager side (e.g. an admin-triggered
    /// join). Mirrors `Connection::join_group`'s lock order: release
    /// the connection's own lock before touching the group index.
    pub fn join_group(self: &Arc<Self>, id: ConnectionId, group: &str) -> crate::error::Result<()> {
        let conn = self.get(id).ok_or(crate::error::WsError::ConnectionNotFound)?;
        conn.join_group(group)
    }

    pub fn leave_group(self: &Arc<Self>, id: ConnectionId, group: &str) {
        if let Some(conn) = self.get(id) {
            conn.leave_group(group);
        }
    }

    /// Enumerate under the manager's lock, then send under each
    /// connection's own send lock.
    /// Returns the count of connections that accepted the frame.
    async fn broadcast_to(&self, ids: Vec<ConnectionId>, message: Message) -> usize {
        let mut sent = 0;
        for id in ids {
            let Some(conn) = self.get(id) else { continue };
            if conn.is_closed() {
                continue;
            }
            match conn.send(message.clone()).await {
                Ok(()) => sent += 1,
                Err(err) => debug!(%id, %err, "broadcast send failed"),
            }
        }
        sent
    }

    pub async fn broadcast_all(&self, message: Message) -> usize {
        self.broadcast_to(self.all_ids(), message).await
    }

    pub async fn broadcast_endpoint(&self, path: &str, message: Message) -> usize {
        self.broadcast_to(self.ids_for_endpoint(path), message).await
    }

    pub async fn broadcast_group(&self, group: &str, message: Message) -> usize {
        self.broadcast_to(self.groups.members(group), message).await
    }

    pub async fn broadcast_ids(&self, ids: &[ConnectionId], message: Message) -> usize {
        self.broadcast_to(ids.to_vec(), message).await
    }

    pub async fn close(&self, id: ConnectionId, code: u16, reason: &str) {
        if let Some(conn) = self.get(id) {
            conn.close(code, reason).await;
        }
    }
}
