use crate::io::{read_packet, write_packet, FrameError};
use crate::server::SharedBroker;
use crate::state::ServerState;
use bytes::BytesMut;
use cambroker_core::protocol::packets::{ConnAckPacket, ConnectReturnCode, Packet};
use cambroker_core::session::keep_alive_deadline;
use cambroker_core::{Authenticator, BrokerError, DisconnectReason, Session, SessionId};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Keep-alive used for the CONNECT deadline, in seconds
    pub default_keep_alive_secs: u16,
    /// Largest accepted frame, fixed header included
    pub max_packet_size: usize,
    /// Pending wakeups per connection
    pub notification_capacity: usize,
    /// Hex dump every frame at trace level
    pub dump_traffic: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            default_keep_alive_secs: 60,
            max_packet_size: 65_536,
            notification_capacity: 8,
            dump_traffic: false,
        }
    }
}

/// Get detailed packet info for logging
fn packet_details(packet: &Packet) -> String {
    match packet {
        Packet::Connect(c) => format!("client_id={}, keep_alive={}", c.client_id, c.keep_alive),
        Packet::ConnAck(c) => format!("rc={}", c.return_code as u8),
        Packet::Publish(p) => format!(
            "topic={}, qos={}, retain={}, packet_id={:?}, payload_len={}",
            p.topic_name,
            p.qos,
            p.retain,
            p.packet_id,
            p.payload.len()
        ),
        Packet::Subscribe(s) => format!(
            "packet_id={}, topics={}",
            s.packet_id,
            s.subscriptions.len()
        ),
        Packet::SubAck(s) => format!(
            "packet_id={}, return_codes={}",
            s.packet_id,
            s.return_codes.len()
        ),
        Packet::Unsubscribe(u) => format!("packet_id={}, topics={}", u.packet_id, u.topics.len()),
        other => match other.packet_id() {
            Some(packet_id) => format!("packet_id={}", packet_id),
            None => String::new(),
        },
    }
}

fn log_packet(session_id: SessionId, verb: &str, packet: &Packet) {
    let details = packet_details(packet);
    if details.is_empty() {
        debug!("Session {}: {} {}", session_id, verb, packet.packet_type());
    } else {
        debug!(
            "Session {}: {} {} ({})",
            session_id,
            verb,
            packet.packet_type(),
            details
        );
    }
}

fn frame_error_reason(session_id: SessionId, error: FrameError) -> DisconnectReason {
    match error {
        FrameError::Io(e) => {
            warn!("Session {}: Transport error: {}", session_id, e);
            DisconnectReason::TransportError
        }
        FrameError::UnexpectedEof { available } => {
            warn!(
                "Session {}: Peer closed mid-frame ({} bytes buffered)",
                session_id, available
            );
            DisconnectReason::PeerClosed
        }
        FrameError::Protocol(e) => {
            warn!("Session {}: Protocol error: {}", session_id, e);
            DisconnectReason::MalformedPacket
        }
    }
}

/// Removes the session from the broker and server state on every exit
/// path, including cancellation of the connection task.
struct SessionGuard {
    session_id: SessionId,
    state: Arc<ServerState>,
    broker: SharedBroker,
    released: bool,
}

impl SessionGuard {
    async fn release(mut self) {
        self.state.remove_connection(self.session_id);
        self.state.remove_notification(self.session_id);
        self.broker.lock().await.remove_session(self.session_id);
        self.released = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session_id = self.session_id;
        self.state.remove_connection(session_id);
        self.state.remove_notification(session_id);
        match self.broker.try_lock() {
            Ok(mut broker) => {
                broker.remove_session(session_id);
            }
            Err(_) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let broker = self.broker.clone();
                    runtime.spawn(async move {
                        broker.lock().await.remove_session(session_id);
                    });
                }
            }
        }
        debug!("Session {} released by drop guard", session_id);
    }
}

/// Reads one packet, mapping every way of not getting one to the reason the
/// connection has to end.
async fn next_packet<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    session_id: SessionId,
    config: &HandlerConfig,
    dump: Option<&str>,
) -> Result<Packet, DisconnectReason>
where
    S: AsyncRead + Unpin,
{
    match read_packet(stream, buffer, config.max_packet_size, dump).await {
        Ok(Some(packet)) => {
            log_packet(session_id, "Received", &packet);
            Ok(packet)
        }
        Ok(None) => Err(DisconnectReason::PeerClosed),
        Err(e) => Err(frame_error_reason(session_id, e)),
    }
}

/// Waits for CONNECT and answers it. Returns the negotiated keep-alive.
#[allow(clippy::too_many_arguments)]
async fn handshake<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    session_id: SessionId,
    peer_addr: &str,
    broker: &SharedBroker,
    authenticator: &dyn Authenticator,
    config: &HandlerConfig,
    dump: Option<&str>,
) -> Result<u16, DisconnectReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let read = next_packet(stream, buffer, session_id, config, dump);
    let packet = match keep_alive_deadline(config.default_keep_alive_secs) {
        Some(deadline) => timeout(deadline, read)
            .await
            .map_err(|_| DisconnectReason::HandshakeTimeout)??,
        None => read.await?,
    };

    let connect = match packet {
        Packet::Connect(connect) => connect,
        other => {
            warn!(
                "Session {}: Expected CONNECT, got {}",
                session_id,
                other.packet_type()
            );
            return Err(DisconnectReason::ProtocolViolation);
        }
    };

    let return_code = {
        let mut broker_guard = broker.lock().await;
        match broker_guard.authorize(&connect, authenticator) {
            ConnectReturnCode::Accepted => {
                let mut session = Session::new(
                    session_id,
                    peer_addr,
                    broker_guard.config().outbound_queue_capacity,
                );
                session.establish(&connect);
                match broker_guard.register_session(session) {
                    Ok(()) => ConnectReturnCode::Accepted,
                    Err(e) => {
                        warn!("Session {}: Registration failed: {}", session_id, e);
                        ConnectReturnCode::ServerUnavailable
                    }
                }
            }
            refused => refused,
        }
    };

    let connack = Packet::ConnAck(ConnAckPacket::new(return_code));
    log_packet(session_id, "Sending", &connack);
    write_packet(stream, &connack, dump)
        .await
        .map_err(|e| frame_error_reason(session_id, e))?;

    if !return_code.is_accepted() {
        return Err(DisconnectReason::ConnectRefused(return_code));
    }
    info!(
        "Session {}: Client '{}' connected from {} (keep-alive {}s)",
        session_id, connect.client_id, peer_addr, connect.keep_alive
    );
    Ok(connect.keep_alive)
}

/// Writes everything the broker queued for this session. Ends the
/// connection once the session has been terminated and its last packets
/// are out.
async fn flush_outbound<S>(
    stream: &mut S,
    session_id: SessionId,
    broker: &SharedBroker,
    dump: Option<&str>,
) -> Result<(), DisconnectReason>
where
    S: AsyncWrite + Unpin,
{
    let (packets, terminated) = {
        let mut broker_guard = broker.lock().await;
        let mut packets = Vec::new();
        while let Ok(Some(packet)) = broker_guard.dequeue_packet_to_send(session_id) {
            packets.push(packet);
        }
        let terminated = match broker_guard.session(session_id) {
            Some(session) if session.is_terminated() => Some(
                session
                    .disconnect_reason()
                    .unwrap_or(DisconnectReason::ProtocolViolation),
            ),
            Some(_) => None,
            None => {
                warn!("Session {}: No longer registered", session_id);
                Some(DisconnectReason::TransportError)
            }
        };
        (packets, terminated)
    };

    if !packets.is_empty() {
        trace!("Sending {} packets to session {}", packets.len(), session_id);
    }
    for packet in &packets {
        log_packet(session_id, "Sending", packet);
        write_packet(stream, packet, dump)
            .await
            .map_err(|e| frame_error_reason(session_id, e))?;
    }

    match terminated {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}

/// Applies one packet to the broker and wakes every other session that
/// now has packets to send.
async fn dispatch(
    session_id: SessionId,
    packet: Packet,
    state: &ServerState,
    broker: &SharedBroker,
) -> Result<(), DisconnectReason> {
    let sessions_to_notify = {
        let mut broker_guard = broker.lock().await;
        if let Err(e) = broker_guard.handle_packet(session_id, packet) {
            warn!("Session {}: Error processing packet: {}", session_id, e);
            return Err(match e {
                BrokerError::SessionQueueFull { .. } => DisconnectReason::TransportError,
                _ => DisconnectReason::ProtocolViolation,
            });
        }
        broker_guard.sessions_with_pending_packets()
    };

    for sid in sessions_to_notify {
        if sid != session_id {
            state.notify_session(sid);
        }
    }
    Ok(())
}

/// Established-state loop. Inbound packets are handled one at a time and
/// outbound packets are written as soon as the broker queues them.
#[allow(clippy::too_many_arguments)]
async fn run_session<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    session_id: SessionId,
    keep_alive_secs: u16,
    state: &ServerState,
    broker: &SharedBroker,
    notify_rx: &mut mpsc::Receiver<()>,
    config: &HandlerConfig,
    dump: Option<&str>,
) -> DisconnectReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // No deadline is modelled as one that never fires
    let read_deadline = keep_alive_deadline(keep_alive_secs);
    let far_future = Duration::from_secs(86_400 * 365);
    let mut last_activity = Instant::now();

    loop {
        if let Err(reason) = flush_outbound(stream, session_id, broker, dump).await {
            return reason;
        }

        let expires_at = last_activity + read_deadline.unwrap_or(far_future);

        tokio::select! {
            result = next_packet(stream, buffer, session_id, config, dump) => {
                let packet = match result {
                    Ok(packet) => packet,
                    Err(reason) => return reason,
                };
                last_activity = Instant::now();
                if let Err(reason) = dispatch(session_id, packet, state, broker).await {
                    return reason;
                }
            }

            // Another session queued packets for this one
            Some(()) = notify_rx.recv() => {
                trace!("Session {}: Received outbound notification", session_id);
            }

            _ = sleep_until(expires_at), if read_deadline.is_some() => {
                info!("Session {} keep-alive timeout", session_id);
                return DisconnectReason::KeepAliveTimeout;
            }
        }
    }
}

/// Handle a single MQTT client connection
///
/// Runs the handshake and the established-state loop, then tears the
/// session down. Returns why the connection ended.
pub async fn handle_connection<S>(
    mut stream: S,
    peer_addr: String,
    state: Arc<ServerState>,
    broker: SharedBroker,
    authenticator: Arc<dyn Authenticator>,
    config: HandlerConfig,
) -> DisconnectReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let session_id = state.generate_session_id();
    info!("New session {} for {}", session_id, peer_addr);

    let (notify_tx, mut notify_rx) = mpsc::channel(config.notification_capacity.max(1));
    state.register_connection(session_id, &peer_addr);
    state.register_notification(session_id, notify_tx);
    let guard = SessionGuard {
        session_id,
        state: state.clone(),
        broker: broker.clone(),
        released: false,
    };

    let dump_tag = format!("[{}]", peer_addr);
    let dump = config.dump_traffic.then_some(dump_tag.as_str());
    let mut read_buffer = BytesMut::with_capacity(4096);

    let reason = match handshake(
        &mut stream,
        &mut read_buffer,
        session_id,
        &peer_addr,
        &broker,
        authenticator.as_ref(),
        &config,
        dump,
    )
    .await
    {
        Ok(keep_alive_secs) => {
            run_session(
                &mut stream,
                &mut read_buffer,
                session_id,
                keep_alive_secs,
                &state,
                &broker,
                &mut notify_rx,
                &config,
                dump,
            )
            .await
        }
        Err(reason) => reason,
    };

    guard.release().await;
    if let Err(e) = stream.shutdown().await {
        trace!("Session {}: Shutdown error: {}", session_id, e);
    }
    info!(
        "Session {} for {} closed: {}",
        session_id, peer_addr, reason
    );
    reason
}
