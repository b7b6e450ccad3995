use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

use crate::error::BrokerError;
use crate::protocol::packets::{ConnectPacket, ConnectReturnCode, Packet, PublishPacket};
use crate::protocol::QoS;
use crate::topics::TopicName;

/// Unique per accepted connection
pub type SessionId = u128;

/// Read deadline for a negotiated keep-alive: one and a half times the
/// interval. A keep-alive of zero means the client never has to speak.
pub fn keep_alive_deadline(keep_alive_secs: u16) -> Option<Duration> {
    if keep_alive_secs == 0 {
        return None;
    }
    Some(Duration::from_secs(keep_alive_secs as u64 * 3 / 2))
}

/// Session state machine
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    AwaitingConnect,
    Established,
    Terminated,
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent DISCONNECT
    ClientDisconnect,
    /// No packet within the keep-alive deadline
    KeepAliveTimeout,
    /// No CONNECT within the handshake deadline
    HandshakeTimeout,
    /// CONNECT refused with the given return code
    ConnectRefused(ConnectReturnCode),
    /// Packet was well formed but not allowed here
    ProtocolViolation,
    /// Bytes could not be decoded
    MalformedPacket,
    /// Peer closed the stream
    PeerClosed,
    /// Read or write failed
    TransportError,
}

impl core::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DisconnectReason::ClientDisconnect => write!(f, "client disconnected"),
            DisconnectReason::KeepAliveTimeout => write!(f, "keep-alive timeout"),
            DisconnectReason::HandshakeTimeout => write!(f, "handshake timeout"),
            DisconnectReason::ConnectRefused(code) => write!(f, "connect refused: {}", code),
            DisconnectReason::ProtocolViolation => write!(f, "protocol violation"),
            DisconnectReason::MalformedPacket => write!(f, "malformed packet"),
            DisconnectReason::PeerClosed => write!(f, "connection closed by peer"),
            DisconnectReason::TransportError => write!(f, "transport error"),
        }
    }
}

/// Client session
///
/// Owns the subscription set, the in-flight acknowledgments and the queue
/// of packets waiting to be written to the client.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier
    pub session_id: SessionId,

    /// Peer address, informational only
    pub remote_address: String,

    /// Client identifier from CONNECT
    pub client_id: String,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,

    state: SessionState,
    disconnect_reason: Option<DisconnectReason>,
    subscriptions: BTreeMap<TopicName, QoS>,
    pending_acks: Vec<PublishPacket>,

    /// Transmit queue (broker -> client)
    tx_queue: VecDeque<Packet>,
    tx_capacity: usize,
}

impl Session {
    pub fn new(session_id: SessionId, remote_address: impl Into<String>, tx_capacity: usize) -> Self {
        Self {
            session_id,
            remote_address: remote_address.into(),
            client_id: String::new(),
            keep_alive_secs: 0,
            state: SessionState::AwaitingConnect,
            disconnect_reason: None,
            subscriptions: BTreeMap::new(),
            pending_acks: Vec::new(),
            tx_queue: VecDeque::new(),
            tx_capacity,
        }
    }

    /// Records the accepted CONNECT and moves to `Established`
    pub fn establish(&mut self, connect: &ConnectPacket) {
        self.client_id = connect.client_id.clone();
        self.keep_alive_secs = connect.keep_alive;
        self.state = SessionState::Established;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn read_deadline(&self) -> Option<Duration> {
        keep_alive_deadline(self.keep_alive_secs)
    }

    /// Marks the session for teardown. The first reason is kept.
    pub fn terminate(&mut self, reason: DisconnectReason) {
        if self.disconnect_reason.is_none() {
            self.disconnect_reason = Some(reason);
        }
        self.state = SessionState::Terminated;
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    /// Records the granted QoS for a topic. Returns false if the topic was
    /// already subscribed, in which case the grant is replaced.
    pub fn subscribe(&mut self, topic: TopicName, granted: QoS) -> bool {
        self.subscriptions.insert(topic, granted).is_none()
    }

    /// Unsubscribing from an unknown topic is not an error
    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        self.subscriptions.remove(topic).is_some()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.contains_key(topic)
    }

    /// QoS granted for an exact topic, `None` when not subscribed
    pub fn granted_qos(&self, topic: &str) -> Option<QoS> {
        self.subscriptions.get(topic).copied()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&TopicName, QoS)> {
        self.subscriptions.iter().map(|(topic, qos)| (topic, *qos))
    }

    /// Whether `count` more packets fit in the outbound queue
    pub fn has_tx_capacity(&self, count: usize) -> bool {
        self.tx_queue.len() + count <= self.tx_capacity
    }

    pub fn track_pending(&mut self, publish: PublishPacket) {
        self.pending_acks.push(publish);
    }

    pub fn has_pending(&self, packet_id: u16) -> bool {
        self.pending_acks
            .iter()
            .any(|publish| publish.packet_id == Some(packet_id))
    }

    /// Removes every in-flight entry with this identifier, returning how many
    pub fn remove_pending(&mut self, packet_id: u16) -> usize {
        let before = self.pending_acks.len();
        self.pending_acks
            .retain(|publish| publish.packet_id != Some(packet_id));
        before - self.pending_acks.len()
    }

    pub fn pending_acks(&self) -> &[PublishPacket] {
        &self.pending_acks
    }

    /// Queue a packet for transmission to the client
    pub fn queue_tx_packet(&mut self, packet: Packet) -> Result<(), BrokerError> {
        if self.tx_queue.len() >= self.tx_capacity {
            return Err(BrokerError::SessionQueueFull {
                queue_size: self.tx_capacity,
            });
        }
        self.tx_queue.push_back(packet);
        Ok(())
    }

    /// Dequeue the next packet to write to the client
    pub fn dequeue_tx_packet(&mut self) -> Option<Packet> {
        self.tx_queue.pop_front()
    }

    pub fn has_pending_tx(&self) -> bool {
        !self.tx_queue.is_empty()
    }
}
