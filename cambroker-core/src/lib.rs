//! # CamBroker Core
//!
//! `no_std` MQTT 3.1.1 broker core for camera and sensor firmware.
//!
//! This crate holds the protocol codec and the broker state machine. It does
//! no I/O and depends on no async runtime; a runtime adapter drives it by
//! feeding decoded packets in and flushing queued packets out.
//!
//! ## Features
//!
//! - **no_std** + `alloc`
//! - **MQTT 3.1.1** codec for every control packet
//! - QoS 0, 1 and 2 with broker-wide acknowledgment resolution
//! - Retained messages
//! - Username/password authentication with SHA-256 password digests
//!
//! ## Limitations
//!
//! - No topic wildcards (`+`, `#`)
//! - No persistent sessions and no queuing for offline clients
//! - No TLS

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ack;
pub mod auth;
pub mod broker;
pub mod error;
pub mod protocol;
pub mod retained;
pub mod session;
pub mod topics;
pub mod traits;

pub use ack::{AckScope, Acknowledgment, BroadcastScope, OriginScope};
pub use auth::{AllowAnonymous, Authenticator, StaticCredentials};
pub use broker::{Broker, BrokerConfig};
pub use error::BrokerError;
pub use protocol::packets::*;
pub use protocol::{PacketType, ProtocolError, QoS};
pub use retained::{RetainedChange, RetainedPublication, RetainedStore};
pub use session::{DisconnectReason, Session, SessionId, SessionState};
pub use topics::TopicName;
pub use traits::{TaskSpawnError, TaskSpawner};
