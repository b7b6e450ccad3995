use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use cambroker_core::SessionId;
use dashmap::DashMap;
use log::trace;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Session ID generation counter
#[derive(Debug)]
pub struct SessionIdGenerator(AtomicU64);

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Generate a unique session ID using timestamp + counter
    ///
    /// Ids from one generator increase monotonically, so the broker's
    /// registry order is connection order.
    pub fn generate(&self) -> SessionId {
        let base = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default() as u128;
        let counter = self.0.fetch_add(1, Ordering::Relaxed) as u128;
        (base << 64) | counter
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight connection metadata
#[derive(Debug)]
pub struct ConnectionHandle {
    pub session_id: SessionId,
    pub peer_addr: String,
    pub connected_at: Instant,
}

/// Server state tracking connections and wakeups
///
/// A wakeup tells a connection task that the broker queued packets for its
/// session while another task held the broker.
#[derive(Debug)]
pub struct ServerState {
    connections: DashMap<SessionId, ConnectionHandle>,
    session_id_gen: SessionIdGenerator,
    notification_senders: DashMap<SessionId, mpsc::Sender<()>>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            session_id_gen: SessionIdGenerator::new(),
            notification_senders: DashMap::new(),
        }
    }

    pub fn register_connection(&self, session_id: SessionId, peer_addr: &str) {
        self.connections.insert(
            session_id,
            ConnectionHandle {
                session_id,
                peer_addr: peer_addr.to_string(),
                connected_at: Instant::now(),
            },
        );
    }

    pub fn remove_connection(&self, session_id: SessionId) -> Option<ConnectionHandle> {
        self.connections
            .remove(&session_id)
            .map(|(_, handle)| handle)
    }

    pub fn register_notification(&self, session_id: SessionId, sender: mpsc::Sender<()>) {
        self.notification_senders.insert(session_id, sender);
    }

    pub fn remove_notification(&self, session_id: SessionId) {
        self.notification_senders.remove(&session_id);
    }

    /// Wake a connection task. A full channel already holds a wakeup, so
    /// nothing is lost by dropping this one.
    pub fn notify_session(&self, session_id: SessionId) {
        if let Some(sender) = self.notification_senders.get(&session_id) {
            match sender.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Closed(())) => {
                    trace!("Session {} wakeup channel closed", session_id);
                }
            }
        }
    }

    pub fn generate_session_id(&self) -> SessionId {
        self.session_id_gen.generate()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}
