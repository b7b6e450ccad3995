//! # cambroker-tokio
//!
//! Tokio runtime adapter for the cambroker MQTT 3.1.1 broker.
//!
//! Each accepted connection runs as its own task. The task performs the
//! CONNECT handshake, feeds decoded packets to the shared
//! [`cambroker_core::Broker`] and writes back whatever the broker queued for
//! its session. Idle sessions are dropped after one and a half keep-alive
//! intervals.
//!
//! ## Example
//!
//! ```no_run
//! use cambroker_tokio::MqttServer;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = MqttServer::new();
//!     server.run("0.0.0.0:1883").await
//! }
//! ```

// Re-export core types for convenience
pub use cambroker_core::{
    broker::Broker, protocol::packets::Packet, protocol::ProtocolError, DisconnectReason,
};

pub mod handler;
pub mod io;
pub mod server;
pub mod state;
pub mod task;

pub use handler::{handle_connection, HandlerConfig};
pub use io::FrameError;
pub use server::{MqttServer, MqttServerConfig, SharedBroker};
pub use state::ServerState;
pub use task::TokioTaskSpawner;
