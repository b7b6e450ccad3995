use crate::handler::{handle_connection, HandlerConfig};
use crate::state::ServerState;
use crate::task::TokioTaskSpawner;
use cambroker_core::{AllowAnonymous, Authenticator, Broker, BrokerConfig, QoS, TaskSpawner};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::time::sleep;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Shared broker type alias
///
/// Every registry mutation happens under this mutex. It is never held
/// across a socket read or write.
pub type SharedBroker = Arc<tokio::sync::Mutex<Broker>>;

/// Runtime configuration for the MQTT server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttServerConfig {
    /// Default keep-alive in seconds (default: 60)
    pub default_keep_alive_secs: u16,
    /// Maximum concurrent sessions (default: 16)
    pub max_sessions: usize,
    /// Highest QoS granted to subscriptions, 0 to 2 (default: 2)
    pub max_qos: u8,
    /// Largest accepted frame in bytes (default: 65536)
    pub max_packet_size: usize,
    /// Outbound packets buffered per session (default: 64)
    pub outbound_queue_capacity: usize,
    /// Pending wakeups per session (default: 8)
    pub notification_capacity: usize,
    /// Hex dump all traffic at trace level (default: false)
    pub dump_traffic: bool,
}

impl Default for MqttServerConfig {
    fn default() -> Self {
        let broker = BrokerConfig::default();
        let handler = HandlerConfig::default();
        Self {
            default_keep_alive_secs: broker.default_keep_alive_secs,
            max_sessions: broker.max_sessions,
            max_qos: broker.max_qos as u8,
            max_packet_size: handler.max_packet_size,
            outbound_queue_capacity: broker.outbound_queue_capacity,
            notification_capacity: handler.notification_capacity,
            dump_traffic: handler.dump_traffic,
        }
    }
}

impl MqttServerConfig {
    pub fn broker_config(&self) -> BrokerConfig {
        let max_qos = QoS::from_u8(self.max_qos).unwrap_or_else(|e| {
            warn!("{}, granting up to QoS 2", e);
            QoS::ExactlyOnce
        });
        BrokerConfig {
            default_keep_alive_secs: self.default_keep_alive_secs,
            max_qos,
            max_sessions: self.max_sessions,
            outbound_queue_capacity: self.outbound_queue_capacity,
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            default_keep_alive_secs: self.default_keep_alive_secs,
            max_packet_size: self.max_packet_size,
            notification_capacity: self.notification_capacity,
            dump_traffic: self.dump_traffic,
        }
    }
}

/// A Tokio-based MQTT broker server
pub struct MqttServer {
    state: Arc<ServerState>,
    broker: SharedBroker,
    authenticator: Arc<dyn Authenticator>,
    config: MqttServerConfig,
}

impl MqttServer {
    /// Create a new server with default configuration
    pub fn new() -> Self {
        Self::with_config(MqttServerConfig::default())
    }

    /// Create a new server with custom configuration
    pub fn with_config(config: MqttServerConfig) -> Self {
        Self {
            state: Arc::new(ServerState::new()),
            broker: Arc::new(tokio::sync::Mutex::new(Broker::new(config.broker_config()))),
            authenticator: Arc::new(AllowAnonymous),
            config,
        }
    }

    /// Replace the credential check consulted on every CONNECT
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Get a handle to the shared broker for external interaction
    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.state.connection_count()
    }

    /// Run the server, binding to the specified address
    pub async fn run<A: ToSocketAddrs>(&self, bind_addr: A) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);
        debug!(
            "Server configuration: keep_alive={}s, max_sessions={}, max_qos={}, max_packet_size={}",
            self.config.default_keep_alive_secs,
            self.config.max_sessions,
            self.config.max_qos,
            self.config.max_packet_size
        );

        let spawner = TokioTaskSpawner::from_current_handle().map_err(std::io::Error::other)?;
        let handler_config = self.config.handler_config();

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    let peer_addr = addr.to_string();
                    info!("New connection from {}", peer_addr);
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                    }

                    let handler_state = self.state.clone();
                    let handler_broker = self.broker.clone();
                    let handler_auth = self.authenticator.clone();
                    let config = handler_config.clone();
                    let spawned = spawner.spawn(async move {
                        handle_connection(
                            socket,
                            peer_addr,
                            handler_state,
                            handler_broker,
                            handler_auth,
                            config,
                        )
                        .await;
                    });
                    if let Err(e) = spawned {
                        error!("Failed to spawn connection task: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

impl Default for MqttServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{read_packet, write_packet};
    use bytes::BytesMut;
    use cambroker_core::protocol::packets::{
        ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet,
    };
    use tokio::net::TcpStream;

    #[test]
    fn test_config_defaults_follow_components() {
        let config = MqttServerConfig::default();
        assert_eq!(config.broker_config(), BrokerConfig::default());
        assert_eq!(config.handler_config().max_packet_size, 65_536);
        assert!(!config.dump_traffic);
    }

    #[test]
    fn test_invalid_max_qos_grants_everything() {
        let config = MqttServerConfig {
            max_qos: 7,
            ..MqttServerConfig::default()
        };
        assert_eq!(config.broker_config().max_qos, QoS::ExactlyOnce);

        let config = MqttServerConfig {
            max_qos: 1,
            ..MqttServerConfig::default()
        };
        assert_eq!(config.broker_config().max_qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_serve_accepts_tcp_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(MqttServer::new());
        let serving = server.clone();
        let task = tokio::spawn(async move { serving.serve(listener).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buffer = BytesMut::new();
        write_packet(
            &mut stream,
            &Packet::Connect(ConnectPacket::new("cam", 30)),
            None,
        )
        .await
        .unwrap();
        let reply = read_packet(&mut stream, &mut buffer, 1024, None)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Some(Packet::ConnAck(ConnAckPacket::new(ConnectReturnCode::Accepted)))
        );
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.broker().lock().await.session_count(), 1);

        task.abort();
    }
}
