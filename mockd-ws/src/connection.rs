//! A single upgraded WebSocket connection: the data the connection
//! manager and read loop share, the atomics that may be read without a
//! lock, and the lock-order discipline §4.2/§5 mandate for group
//! membership and send-vs-close.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

use mockd_core::group_index::check_group_cap;

use crate::error::{Result, WsError};
use crate::manager::ConnectionManager;
use crate::scenario::ScenarioRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

pub fn next_connection_id() -> ConnectionId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// One live upgraded connection. The socket
/// itself lives in the read/write task pair spawned by the handler;
/// this struct is the shared handle everything else (manager,
/// broadcast, scenario runtime) reaches the connection through.
pub struct Connection {
    pub id: ConnectionId,
    pub endpoint_path: String,
    pub arrival: Instant,
    last_activity: Mutex<Instant>,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    groups: Mutex<HashSet<String>>,
    metadata: Mutex<std::collections::HashMap<String, String>>,
    pub scenario: Mutex<Option<Arc<ScenarioRuntime>>>,
    /// Readers are ordinary sends; `close` acquires the writer side so
    /// a send-in-flight can't race a close-frame emission.
    send_lock: RwLock<()>,
    outbound: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    manager: Weak<ConnectionManager>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        endpoint_path: String,
        outbound: mpsc::UnboundedSender<Message>,
        manager: Weak<ConnectionManager>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            endpoint_path,
            arrival: now,
            last_activity: Mutex::new(now),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            groups: Mutex::new(HashSet::new()),
            metadata: Mutex::new(std::collections::HashMap::new()),
            scenario: Mutex::new(None),
            send_lock: RwLock::new(()),
            outbound,
            closed: AtomicBool::new(false),
            manager,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.lock().unwrap().insert(key.into(), value.into());
    }

    pub fn metadata_snapshot(&self) -> std::collections::HashMap<String, String> {
        self.metadata.lock().unwrap().clone()
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().unwrap().len()
    }

    pub fn groups_snapshot(&self) -> Vec<String> {
        self.groups.lock().unwrap().iter().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Join `group` from the connection side. Obeys the mandated lock
    /// order: this connection's own group set is updated and its guard
    /// dropped *before* the manager's group index is touched.
    pub fn join_group(self: &Arc<Self>, group: &str) -> Result<()> {
        {
            let mut groups = self.groups.lock().unwrap();
            if !groups.contains(group) {
                check_group_cap(groups.len()).map_err(WsError::from)?;
            }
            groups.insert(group.to_string());
        } // connection mutex released here
        if let Some(manager) = self.manager.upgrade() {
            manager.groups.join(group, self.id);
        }
        Ok(())
    }

    pub fn leave_group(self: &Arc<Self>, group: &str) {
        {
            let mut groups = self.groups.lock().unwrap();
            groups.remove(group);
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.groups.leave(group, &self.id);
        }
    }

    /// Send one frame, incrementing `messagesSent` without taking a
    /// lock and holding the send lock as a
    /// reader for the duration of the enqueue.
    pub async fn send(&self, message: Message) -> Result<()> {
        let _guard = self.send_lock.read().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(WsError::Core(mockd_core::error::CoreError::Io(
                std::io::Error::new(std::io::ErrorKind::NotConnected, "connection is closed"),
            )));
        }
        self.outbound
            .send(message)
            .map_err(|_| WsError::Core(mockd_core::error::CoreError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer task gone"))))?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into().into())).await
    }

    /// Close with a code/reason, taking the send lock as a writer so no
    /// concurrent send can race the close frame.
    pub async fn close(&self, code: u16, reason: &str) {
        let _guard = self.send_lock.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let frame = axum::extract::ws::CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        let _ = self.outbound.send(Message::Close(Some(frame)));
    }
}
