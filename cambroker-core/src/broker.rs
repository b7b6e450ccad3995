//! MQTT broker implementation (core logic)
//!
//! Owns the connection registry and the retained-message store and applies
//! every inbound control packet to them. Nothing here suspends: a runtime
//! adapter calls in with a decoded packet, then flushes whatever was queued
//! on each session.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::ack::{AckScope, Acknowledgment, BroadcastScope};
use crate::auth::Authenticator;
use crate::error::BrokerError;
use crate::protocol::packets::{
    ConnectPacket, ConnectReturnCode, Packet, PingRespPacket, PubAckPacket, PublishPacket,
    SubAckPacket, SubAckReturnCode, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use crate::protocol::QoS;
use crate::retained::{RetainedChange, RetainedStore};
use crate::session::{DisconnectReason, Session, SessionId};

/// Broker limits and defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Keep-alive used for the CONNECT deadline, in seconds
    pub default_keep_alive_secs: u16,
    /// Highest QoS granted to a subscription
    pub max_qos: QoS,
    /// Maximum number of registered sessions
    pub max_sessions: usize,
    /// Packets a session may have waiting to be written. A copy forwarded
    /// to a subscriber whose queue is full is dropped, whatever its QoS, so
    /// size this for the slowest expected reader.
    pub outbound_queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_keep_alive_secs: 60,
            max_qos: QoS::ExactlyOnce,
            max_sessions: 16,
            outbound_queue_capacity: 64,
        }
    }
}

/// MQTT broker (core logic)
///
/// Platform-agnostic and `no_std`. Sessions are kept ordered by id, which
/// is also the order in which they connected, so fan-out is deterministic.
#[derive(Debug)]
pub struct Broker<S: AckScope = BroadcastScope> {
    config: BrokerConfig,
    sessions: BTreeMap<SessionId, Session>,
    retained: RetainedStore,
    ack_scope: S,
}

impl Default for Broker<BroadcastScope> {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Broker<BroadcastScope> {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_ack_scope(config, BroadcastScope)
    }
}

impl<S: AckScope> Broker<S> {
    pub fn with_ack_scope(config: BrokerConfig, ack_scope: S) -> Self {
        Self {
            config,
            sessions: BTreeMap::new(),
            retained: RetainedStore::new(),
            ack_scope,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Validates a CONNECT: protocol first, then capacity, then credentials
    pub fn authorize(
        &self,
        connect: &ConnectPacket,
        authenticator: &dyn Authenticator,
    ) -> ConnectReturnCode {
        if !connect.is_supported_protocol() {
            info!(
                "Client '{}' requested unsupported protocol {} level {}",
                connect.client_id, connect.protocol_name, connect.protocol_level
            );
            return ConnectReturnCode::UnacceptableProtocolVersion;
        }
        if self.sessions.len() >= self.config.max_sessions {
            warn!(
                "Refusing client '{}': {} sessions already connected",
                connect.client_id,
                self.sessions.len()
            );
            return ConnectReturnCode::ServerUnavailable;
        }
        let password = connect.password.as_deref();
        if !authenticator.check(connect.username.as_deref(), password) {
            info!("Client '{}' failed authentication", connect.client_id);
            return ConnectReturnCode::BadUserNameOrPassword;
        }
        ConnectReturnCode::Accepted
    }

    /// Inserts an established session into the registry
    pub fn register_session(&mut self, session: Session) -> Result<(), BrokerError> {
        let session_id = session.session_id;
        if self.sessions.contains_key(&session_id) {
            return Err(BrokerError::SessionAlreadyRegistered { session_id });
        }
        if self.sessions.len() >= self.config.max_sessions {
            return Err(BrokerError::MaxSessionsReached {
                max_sessions: self.config.max_sessions,
            });
        }
        debug!(
            "Registering session {} for client '{}'",
            session_id, session.client_id
        );
        self.sessions.insert(session_id, session);
        Ok(())
    }

    /// Removes a session from the registry; unknown ids are ignored
    pub fn remove_session(&mut self, session_id: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&session_id);
        if let Some(session) = &removed {
            debug!(
                "Removed session {} for client '{}'",
                session_id, session.client_id
            );
        }
        removed
    }

    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Registered sessions in connection order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn retained(&self) -> &RetainedStore {
        &self.retained
    }

    /// Applies one inbound packet from an established session
    pub fn handle_packet(
        &mut self,
        session_id: SessionId,
        packet: Packet,
    ) -> Result<(), BrokerError> {
        self.session_mut(session_id)?;

        if let Some(ack) = Acknowledgment::from_packet(&packet) {
            return self.handle_ack(session_id, ack);
        }

        match packet {
            Packet::Disconnect(_) => {
                self.session_mut(session_id)?
                    .terminate(DisconnectReason::ClientDisconnect);
                Ok(())
            }
            Packet::PingReq(_) => self
                .session_mut(session_id)?
                .queue_tx_packet(Packet::PingResp(PingRespPacket)),
            Packet::Publish(publish) => self.handle_publish(session_id, publish),
            Packet::Subscribe(subscribe) => self.handle_subscribe(session_id, subscribe),
            Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(session_id, unsubscribe),
            other => {
                warn!(
                    "Ignoring unexpected {} from session {}",
                    other.packet_type(),
                    session_id
                );
                Ok(())
            }
        }
    }

    /// Routes a publication to every session subscribed to its exact topic
    pub fn handle_publish(
        &mut self,
        session_id: SessionId,
        publish: PublishPacket,
    ) -> Result<(), BrokerError> {
        // PUBACK is queued before any state changes
        let publisher = self.session_mut(session_id)?;
        if let (QoS::AtLeastOnce, Some(packet_id)) = (publish.qos, publish.packet_id) {
            publisher.queue_tx_packet(Packet::PubAck(PubAckPacket::new(packet_id)))?;
        }
        if publish.qos.requires_packet_id() {
            publisher.track_pending(publish.clone());
        }

        match self.retained.apply(&publish) {
            RetainedChange::Stored => debug!("Retained message stored for '{}'", publish.topic_name),
            RetainedChange::Cleared => {
                debug!("Retained message cleared for '{}'", publish.topic_name)
            }
            RetainedChange::Unchanged => {}
        }

        let mut delivered = 0usize;
        for subscriber in self.sessions.values_mut() {
            if subscriber.is_terminated() {
                continue;
            }
            let Some(granted) = subscriber.granted_qos(&publish.topic_name) else {
                continue;
            };
            if forward(subscriber, publish.clone(), granted) {
                delivered += 1;
            }
        }
        debug!(
            "PUBLISH '{}' from session {} delivered to {} subscriber(s)",
            publish.topic_name, session_id, delivered
        );
        Ok(())
    }

    /// Grants `min(requested, max_qos)` per topic, then replays retained
    /// messages for the topics just subscribed.
    ///
    /// A requested QoS outside 0..=2 is answered with a failure return code
    /// and terminates the session once the SUBACK is queued.
    pub fn handle_subscribe(
        &mut self,
        session_id: SessionId,
        subscribe: SubscribePacket,
    ) -> Result<(), BrokerError> {
        let max_qos = self.config.max_qos;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(BrokerError::SessionNotFound { session_id })?;

        let mut return_codes = Vec::with_capacity(subscribe.subscriptions.len());
        let mut grants = Vec::with_capacity(subscribe.subscriptions.len());
        for request in subscribe.subscriptions {
            match request.qos() {
                Ok(requested) => {
                    let granted = requested.min(max_qos);
                    debug!(
                        "Session {} subscribed to '{}' (QoS {} granted {})",
                        session_id, request.topic, requested, granted
                    );
                    return_codes.push(SubAckReturnCode::Granted(granted));
                    grants.push((request.topic, granted));
                }
                Err(_) => {
                    warn!(
                        "Session {} requested invalid QoS {} for '{}'",
                        session_id, request.requested_qos, request.topic
                    );
                    return_codes.push(SubAckReturnCode::Failure);
                }
            }
        }
        let violation = grants.len() < return_codes.len();

        // Subscriptions are only recorded once the SUBACK is queued
        session.queue_tx_packet(Packet::SubAck(SubAckPacket {
            packet_id: subscribe.packet_id,
            return_codes,
        }))?;
        for (topic, granted) in &grants {
            session.subscribe(topic.clone(), *granted);
        }

        if violation {
            session.terminate(DisconnectReason::ProtocolViolation);
            return Ok(());
        }

        for (topic, granted) in &grants {
            if let Some(retained) = self.retained.get(topic) {
                debug!("Replaying retained message for '{}' to session {}", topic, session_id);
                forward(session, retained.to_publish(), *granted);
            }
        }
        Ok(())
    }

    pub fn handle_unsubscribe(
        &mut self,
        session_id: SessionId,
        unsubscribe: UnsubscribePacket,
    ) -> Result<(), BrokerError> {
        let session = self.session_mut(session_id)?;
        for topic in &unsubscribe.topics {
            if session.unsubscribe(topic) {
                debug!("Session {} unsubscribed from '{}'", session_id, topic);
            }
        }
        session.queue_tx_packet(Packet::UnsubAck(UnsubAckPacket::new(unsubscribe.packet_id)))
    }

    /// Resolves an acknowledgment against every session in scope that holds
    /// an in-flight publication with the same identifier.
    pub fn handle_ack(
        &mut self,
        session_id: SessionId,
        ack: Acknowledgment,
    ) -> Result<(), BrokerError> {
        self.session_mut(session_id)?;
        let packet_id = ack.packet_id();

        let mut matched = 0usize;
        for (candidate_id, candidate) in self.sessions.iter_mut() {
            if !self.ack_scope.applies_to(session_id, *candidate_id)
                || !candidate.has_pending(packet_id)
            {
                continue;
            }
            matched += 1;
            if let Some(echo) = ack.echo() {
                if let Err(e) = candidate.queue_tx_packet(echo) {
                    warn!(
                        "Dropping {:?} for session {}: {}",
                        ack, candidate_id, e
                    );
                }
            }
            if ack.completes() {
                candidate.remove_pending(packet_id);
            }
        }

        if matched == 0 {
            debug!(
                "{:?} from session {} matched no in-flight publication",
                ack, session_id
            );
        }
        Ok(())
    }

    /// Dequeue the next packet waiting to be written to a session
    pub fn dequeue_packet_to_send(
        &mut self,
        session_id: SessionId,
    ) -> Result<Option<Packet>, BrokerError> {
        Ok(self.session_mut(session_id)?.dequeue_tx_packet())
    }

    /// Sessions with packets waiting to be written
    pub fn sessions_with_pending_packets(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| session.has_pending_tx())
            .map(|session| session.session_id)
            .collect()
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut Session, BrokerError> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(BrokerError::SessionNotFound { session_id })
    }
}

/// Queues a publication on a subscriber at no more than the QoS it was
/// granted, tracking it when it needs an acknowledgment. A full queue drops
/// the copy.
fn forward(subscriber: &mut Session, mut publish: PublishPacket, granted: QoS) -> bool {
    if publish.qos > granted {
        publish.qos = granted;
        if !granted.requires_packet_id() {
            publish.packet_id = None;
            publish.dup = false;
        }
    }
    let tracked = publish.qos.requires_packet_id().then(|| publish.clone());
    match subscriber.queue_tx_packet(Packet::Publish(publish)) {
        Ok(()) => {
            if let Some(publish) = tracked {
                subscriber.track_pending(publish);
            }
            true
        }
        Err(e) => {
            warn!(
                "Dropping PUBLISH for session {}: {}",
                subscriber.session_id, e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::OriginScope;
    use crate::auth::{AllowAnonymous, StaticCredentials};
    use crate::protocol::packets::{PubCompPacket, PubRecPacket, PubRelPacket, SubscriptionRequest};
    use crate::topics::TopicName;

    fn topic(name: &str) -> TopicName {
        TopicName::try_from(name).unwrap()
    }

    fn connect<S: AckScope>(broker: &mut Broker<S>, session_id: SessionId) {
        let mut session = Session::new(session_id, "127.0.0.1:1", broker.config().outbound_queue_capacity);
        session.establish(&ConnectPacket::new("client", 60));
        broker.register_session(session).unwrap();
    }

    fn subscribe<S: AckScope>(broker: &mut Broker<S>, session_id: SessionId, name: &str, qos: QoS) {
        broker
            .handle_packet(
                session_id,
                Packet::Subscribe(SubscribePacket {
                    packet_id: 1,
                    subscriptions: vec![SubscriptionRequest::new(topic(name), qos)],
                }),
            )
            .unwrap();
    }

    fn drain<S: AckScope>(broker: &mut Broker<S>, session_id: SessionId) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(packet) = broker.dequeue_packet_to_send(session_id).unwrap() {
            packets.push(packet);
        }
        packets
    }

    fn publish(name: &str, payload: &'static [u8]) -> PublishPacket {
        PublishPacket::new(topic(name), payload)
    }

    #[test]
    fn test_authorize_rejects_unknown_protocol() {
        let broker = Broker::default();
        let mut connect = ConnectPacket::new("c", 60);
        connect.protocol_name = "MQIsdp".into();
        connect.protocol_level = 3;
        assert_eq!(
            broker.authorize(&connect, &AllowAnonymous),
            ConnectReturnCode::UnacceptableProtocolVersion
        );
    }

    #[test]
    fn test_authorize_checks_credentials() {
        let broker = Broker::default();
        let credentials = StaticCredentials::new("admin", b"secret");
        let good = ConnectPacket::new("c", 60).with_credentials("admin", b"secret");
        let bad = ConnectPacket::new("c", 60).with_credentials("admin", b"nope");
        assert_eq!(broker.authorize(&good, &credentials), ConnectReturnCode::Accepted);
        assert_eq!(
            broker.authorize(&bad, &credentials),
            ConnectReturnCode::BadUserNameOrPassword
        );
    }

    #[test]
    fn test_authorize_when_full() {
        let mut broker = Broker::new(BrokerConfig {
            max_sessions: 1,
            ..BrokerConfig::default()
        });
        connect(&mut broker, 1);
        assert_eq!(
            broker.authorize(&ConnectPacket::new("c", 60), &AllowAnonymous),
            ConnectReturnCode::ServerUnavailable
        );
        let session = Session::new(2, "peer", 4);
        assert_eq!(
            broker.register_session(session),
            Err(BrokerError::MaxSessionsReached { max_sessions: 1 })
        );
    }

    #[test]
    fn test_register_twice() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        assert_eq!(
            broker.register_session(Session::new(1, "peer", 4)),
            Err(BrokerError::SessionAlreadyRegistered { session_id: 1 })
        );
        assert!(broker.remove_session(1).is_some());
        assert!(broker.remove_session(1).is_none());
        assert_eq!(broker.session_count(), 0);
    }

    #[test]
    fn test_unknown_session() {
        let mut broker = Broker::default();
        assert_eq!(
            broker.handle_packet(9, Packet::PingReq(crate::protocol::packets::PingReqPacket)),
            Err(BrokerError::SessionNotFound { session_id: 9 })
        );
    }

    #[test]
    fn test_pingreq_and_disconnect() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        broker
            .handle_packet(1, Packet::PingReq(crate::protocol::packets::PingReqPacket))
            .unwrap();
        assert_eq!(drain(&mut broker, 1), vec![Packet::PingResp(PingRespPacket)]);

        broker
            .handle_packet(1, Packet::Disconnect(crate::protocol::packets::DisconnectPacket))
            .unwrap();
        let session = broker.session(1).unwrap();
        assert!(session.is_terminated());
        assert_eq!(
            session.disconnect_reason(),
            Some(DisconnectReason::ClientDisconnect)
        );
        assert!(drain(&mut broker, 1).is_empty());
    }

    #[test]
    fn test_unexpected_packet_is_ignored() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        broker
            .handle_packet(1, Packet::PingResp(PingRespPacket))
            .unwrap();
        assert!(!broker.session(1).unwrap().is_terminated());
    }

    #[test]
    fn test_exact_match_fan_out() {
        let mut broker = Broker::default();
        for id in 1..=4 {
            connect(&mut broker, id);
        }
        subscribe(&mut broker, 1, "a/b", QoS::AtMostOnce);
        subscribe(&mut broker, 2, "a/b", QoS::AtMostOnce);
        subscribe(&mut broker, 3, "a/b/c", QoS::AtMostOnce);
        subscribe(&mut broker, 4, "a", QoS::AtMostOnce);
        for id in 1..=4 {
            drain(&mut broker, id);
        }

        broker
            .handle_packet(4, Packet::Publish(publish("a/b", b"x")))
            .unwrap();

        assert_eq!(broker.sessions_with_pending_packets(), vec![1, 2]);
        assert_eq!(
            drain(&mut broker, 1),
            vec![Packet::Publish(publish("a/b", b"x"))]
        );
        assert!(drain(&mut broker, 3).is_empty());
        assert!(drain(&mut broker, 4).is_empty());
    }

    #[test]
    fn test_publisher_receives_own_subscription() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        subscribe(&mut broker, 1, "t", QoS::AtMostOnce);
        drain(&mut broker, 1);
        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x")))
            .unwrap();
        assert_eq!(drain(&mut broker, 1).len(), 1);
    }

    #[test]
    fn test_retained_replay_and_clear() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        connect(&mut broker, 2);

        let retained = publish("t", b"x").with_retain(true);
        broker
            .handle_packet(1, Packet::Publish(retained.clone()))
            .unwrap();
        assert_eq!(broker.retained().len(), 1);

        subscribe(&mut broker, 2, "t", QoS::AtMostOnce);
        let packets = drain(&mut broker, 2);
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[0], Packet::SubAck(_)));
        assert_eq!(packets[1], Packet::Publish(retained));

        broker
            .handle_packet(1, Packet::Publish(publish("t", b"").with_retain(true)))
            .unwrap();
        assert!(broker.retained().is_empty());

        connect(&mut broker, 3);
        subscribe(&mut broker, 3, "t", QoS::AtMostOnce);
        let packets = drain(&mut broker, 3);
        assert_eq!(packets.len(), 1);
        assert!(matches!(packets[0], Packet::SubAck(_)));
    }

    #[test]
    fn test_non_retained_empty_payload_keeps_entry() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x").with_retain(true)))
            .unwrap();
        broker
            .handle_packet(1, Packet::Publish(publish("t", b"")))
            .unwrap();
        assert!(broker.retained().get("t").is_some());
    }

    #[test]
    fn test_qos1_handshake() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        subscribe(&mut broker, 2, "t", QoS::AtLeastOnce);
        drain(&mut broker, 2);

        let message = publish("t", b"x").with_qos(QoS::AtLeastOnce, 42);
        broker
            .handle_packet(1, Packet::Publish(message.clone()))
            .unwrap();

        assert_eq!(
            drain(&mut broker, 1),
            vec![Packet::PubAck(PubAckPacket::new(42))]
        );
        assert!(broker.session(1).unwrap().has_pending(42));
        assert_eq!(drain(&mut broker, 2), vec![Packet::Publish(message)]);
        assert!(broker.session(2).unwrap().has_pending(42));

        broker
            .handle_packet(2, Packet::PubAck(PubAckPacket::new(42)))
            .unwrap();
        assert!(!broker.session(1).unwrap().has_pending(42));
        assert!(!broker.session(2).unwrap().has_pending(42));
        assert!(broker.sessions_with_pending_packets().is_empty());
    }

    #[test]
    fn test_qos2_exchange_is_echoed() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        connect(&mut broker, 3);
        subscribe(&mut broker, 2, "t", QoS::ExactlyOnce);
        drain(&mut broker, 2);

        let message = publish("t", b"x").with_qos(QoS::ExactlyOnce, 7);
        broker.handle_packet(1, Packet::Publish(message)).unwrap();
        assert!(drain(&mut broker, 1).is_empty());
        assert_eq!(drain(&mut broker, 2).len(), 1);

        broker
            .handle_packet(2, Packet::PubRec(PubRecPacket::new(7)))
            .unwrap();
        assert_eq!(drain(&mut broker, 1), vec![Packet::PubRec(PubRecPacket::new(7))]);
        assert_eq!(drain(&mut broker, 2), vec![Packet::PubRec(PubRecPacket::new(7))]);
        assert!(drain(&mut broker, 3).is_empty());

        broker
            .handle_packet(1, Packet::PubRel(PubRelPacket::new(7)))
            .unwrap();
        assert_eq!(drain(&mut broker, 1), vec![Packet::PubRel(PubRelPacket::new(7))]);
        assert_eq!(drain(&mut broker, 2), vec![Packet::PubRel(PubRelPacket::new(7))]);

        broker
            .handle_packet(2, Packet::PubComp(PubCompPacket::new(7)))
            .unwrap();
        assert_eq!(drain(&mut broker, 1), vec![Packet::PubComp(PubCompPacket::new(7))]);
        assert_eq!(drain(&mut broker, 2), vec![Packet::PubComp(PubCompPacket::new(7))]);
        assert!(!broker.session(1).unwrap().has_pending(7));
        assert!(!broker.session(2).unwrap().has_pending(7));
    }

    #[test]
    fn test_origin_scope_resolves_own_entries_only() {
        let mut broker = Broker::with_ack_scope(BrokerConfig::default(), OriginScope);
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        subscribe(&mut broker, 2, "t", QoS::AtLeastOnce);
        drain(&mut broker, 2);

        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x").with_qos(QoS::AtLeastOnce, 5)))
            .unwrap();
        broker
            .handle_packet(2, Packet::PubAck(PubAckPacket::new(5)))
            .unwrap();
        assert!(broker.session(1).unwrap().has_pending(5));
        assert!(!broker.session(2).unwrap().has_pending(5));
    }

    #[test]
    fn test_subscribe_grants_at_most_max_qos() {
        let mut broker = Broker::new(BrokerConfig {
            max_qos: QoS::AtLeastOnce,
            ..BrokerConfig::default()
        });
        connect(&mut broker, 1);
        broker
            .handle_packet(
                1,
                Packet::Subscribe(SubscribePacket {
                    packet_id: 11,
                    subscriptions: vec![
                        SubscriptionRequest::new(topic("a"), QoS::ExactlyOnce),
                        SubscriptionRequest::new(topic("b"), QoS::AtMostOnce),
                    ],
                }),
            )
            .unwrap();
        assert_eq!(
            drain(&mut broker, 1),
            vec![Packet::SubAck(SubAckPacket {
                packet_id: 11,
                return_codes: vec![
                    SubAckReturnCode::Granted(QoS::AtLeastOnce),
                    SubAckReturnCode::Granted(QoS::AtMostOnce),
                ],
            })]
        );
    }

    #[test]
    fn test_subscribe_invalid_qos_terminates_after_suback() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        broker
            .handle_packet(
                1,
                Packet::Subscribe(SubscribePacket {
                    packet_id: 3,
                    subscriptions: vec![
                        SubscriptionRequest::new(topic("ok"), QoS::AtMostOnce),
                        SubscriptionRequest {
                            topic: topic("bad"),
                            requested_qos: 3,
                        },
                    ],
                }),
            )
            .unwrap();
        let session = broker.session(1).unwrap();
        assert!(session.is_terminated());
        assert_eq!(
            session.disconnect_reason(),
            Some(DisconnectReason::ProtocolViolation)
        );
        assert!(!session.is_subscribed("bad"));
        assert_eq!(
            drain(&mut broker, 1),
            vec![Packet::SubAck(SubAckPacket {
                packet_id: 3,
                return_codes: vec![
                    SubAckReturnCode::Granted(QoS::AtMostOnce),
                    SubAckReturnCode::Failure,
                ],
            })]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        subscribe(&mut broker, 1, "keep", QoS::AtMostOnce);
        drain(&mut broker, 1);

        broker
            .handle_packet(
                1,
                Packet::Unsubscribe(UnsubscribePacket {
                    packet_id: 8,
                    topics: vec![topic("never")],
                }),
            )
            .unwrap();
        assert_eq!(
            drain(&mut broker, 1),
            vec![Packet::UnsubAck(UnsubAckPacket::new(8))]
        );
        assert!(broker.session(1).unwrap().is_subscribed("keep"));
    }

    #[test]
    fn test_terminated_session_receives_nothing() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        subscribe(&mut broker, 2, "t", QoS::AtMostOnce);
        drain(&mut broker, 2);
        broker
            .handle_packet(2, Packet::Disconnect(crate::protocol::packets::DisconnectPacket))
            .unwrap();
        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x")))
            .unwrap();
        assert!(drain(&mut broker, 2).is_empty());
    }

    #[test]
    fn test_full_subscriber_queue_is_isolated() {
        let mut broker = Broker::new(BrokerConfig {
            outbound_queue_capacity: 1,
            ..BrokerConfig::default()
        });
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        connect(&mut broker, 3);
        subscribe(&mut broker, 2, "t", QoS::AtLeastOnce);
        subscribe(&mut broker, 3, "t", QoS::AtLeastOnce);
        drain(&mut broker, 3);

        // Session 2 never drained its SUBACK, so its queue is full
        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x").with_qos(QoS::AtLeastOnce, 1)))
            .unwrap();
        assert!(!broker.session(2).unwrap().has_pending(1));
        assert!(broker.session(3).unwrap().has_pending(1));
        assert_eq!(
            drain(&mut broker, 1),
            vec![Packet::PubAck(PubAckPacket::new(1))]
        );
    }

    #[test]
    fn test_forward_respects_granted_qos() {
        let mut broker = Broker::new(BrokerConfig {
            max_qos: QoS::AtMostOnce,
            ..BrokerConfig::default()
        });
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        subscribe(&mut broker, 2, "t", QoS::ExactlyOnce);
        assert_eq!(
            drain(&mut broker, 2),
            vec![Packet::SubAck(SubAckPacket {
                packet_id: 1,
                return_codes: vec![SubAckReturnCode::Granted(QoS::AtMostOnce)],
            })]
        );

        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x").with_qos(QoS::ExactlyOnce, 9)))
            .unwrap();
        assert_eq!(drain(&mut broker, 2), vec![Packet::Publish(publish("t", b"x"))]);
        assert!(!broker.session(2).unwrap().has_pending(9));
        assert!(broker.session(1).unwrap().has_pending(9));
    }

    #[test]
    fn test_downgrade_keeps_identifier_above_qos0() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        subscribe(&mut broker, 2, "t", QoS::AtLeastOnce);
        drain(&mut broker, 2);

        broker
            .handle_packet(1, Packet::Publish(publish("t", b"x").with_qos(QoS::ExactlyOnce, 4)))
            .unwrap();
        assert_eq!(
            drain(&mut broker, 2),
            vec![Packet::Publish(publish("t", b"x").with_qos(QoS::AtLeastOnce, 4))]
        );
        assert!(broker.session(2).unwrap().has_pending(4));
    }

    #[test]
    fn test_retained_replay_respects_granted_qos() {
        let mut broker = Broker::default();
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        broker
            .handle_packet(
                1,
                Packet::Publish(publish("r", b"y").with_retain(true).with_qos(QoS::AtLeastOnce, 6)),
            )
            .unwrap();

        subscribe(&mut broker, 2, "r", QoS::AtMostOnce);
        let packets = drain(&mut broker, 2);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1], Packet::Publish(publish("r", b"y").with_retain(true)));
        assert!(!broker.session(2).unwrap().has_pending(6));
    }

    #[test]
    fn test_full_publisher_queue_rejects_publish_cleanly() {
        let mut broker = Broker::new(BrokerConfig {
            outbound_queue_capacity: 1,
            ..BrokerConfig::default()
        });
        connect(&mut broker, 1);
        connect(&mut broker, 2);
        subscribe(&mut broker, 2, "t", QoS::AtLeastOnce);
        drain(&mut broker, 2);
        broker
            .handle_packet(1, Packet::PingReq(crate::protocol::packets::PingReqPacket))
            .unwrap();

        let retained = publish("t", b"x")
            .with_retain(true)
            .with_qos(QoS::AtLeastOnce, 1);
        assert_eq!(
            broker.handle_packet(1, Packet::Publish(retained)),
            Err(BrokerError::SessionQueueFull { queue_size: 1 })
        );
        assert!(broker.retained().is_empty());
        assert!(!broker.session(1).unwrap().has_pending(1));
        assert!(drain(&mut broker, 2).is_empty());
        assert_eq!(drain(&mut broker, 1), vec![Packet::PingResp(PingRespPacket)]);
    }

    #[test]
    fn test_full_queue_rejects_subscribe_cleanly() {
        let mut broker = Broker::new(BrokerConfig {
            outbound_queue_capacity: 1,
            ..BrokerConfig::default()
        });
        connect(&mut broker, 1);
        broker
            .handle_packet(1, Packet::PingReq(crate::protocol::packets::PingReqPacket))
            .unwrap();
        let result = broker.handle_packet(
            1,
            Packet::Subscribe(SubscribePacket {
                packet_id: 2,
                subscriptions: vec![SubscriptionRequest::new(topic("t"), QoS::AtMostOnce)],
            }),
        );
        assert_eq!(result, Err(BrokerError::SessionQueueFull { queue_size: 1 }));
        assert!(!broker.session(1).unwrap().is_subscribed("t"));
    }
}
