//! Broker error types
//!
//! no_std compatible error handling

use crate::protocol::ProtocolError;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// A session with the given ID is already registered
    SessionAlreadyRegistered { session_id: SessionId },
    /// No session with the given ID is registered
    SessionNotFound { session_id: SessionId },
    /// The session's outbound queue is full
    SessionQueueFull { queue_size: usize },
    /// Maximum number of sessions reached
    MaxSessionsReached { max_sessions: usize },
    /// Packet encoding/decoding error occurred
    Protocol { error: ProtocolError },
}

impl core::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BrokerError::SessionAlreadyRegistered { session_id } => {
                write!(f, "Session {} is already registered", session_id)
            }
            BrokerError::SessionNotFound { session_id } => {
                write!(f, "Session {} was not found", session_id)
            }
            BrokerError::SessionQueueFull { queue_size } => {
                write!(f, "Session outbound queue is full (size: {})", queue_size)
            }
            BrokerError::MaxSessionsReached { max_sessions } => {
                write!(f, "Maximum number of sessions reached: {}", max_sessions)
            }
            BrokerError::Protocol { error } => {
                write!(f, "Packet encoding/decoding error occurred: {}", error)
            }
        }
    }
}

impl core::error::Error for BrokerError {}

impl From<ProtocolError> for BrokerError {
    fn from(error: ProtocolError) -> Self {
        BrokerError::Protocol { error }
    }
}
