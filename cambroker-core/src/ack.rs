//! Acknowledgment resolution
//!
//! An inbound PUBACK, PUBREC, PUBREL or PUBCOMP is matched by identifier
//! against the in-flight publications of candidate sessions. Which sessions
//! are candidates is decided by an [`AckScope`].

use crate::protocol::packets::{Packet, PubCompPacket, PubRecPacket, PubRelPacket};
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
}

impl Acknowledgment {
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        match packet {
            Packet::PubAck(ack) => Some(Acknowledgment::PubAck(ack.packet_id)),
            Packet::PubRec(ack) => Some(Acknowledgment::PubRec(ack.packet_id)),
            Packet::PubRel(ack) => Some(Acknowledgment::PubRel(ack.packet_id)),
            Packet::PubComp(ack) => Some(Acknowledgment::PubComp(ack.packet_id)),
            _ => None,
        }
    }

    pub const fn packet_id(self) -> u16 {
        match self {
            Acknowledgment::PubAck(id)
            | Acknowledgment::PubRec(id)
            | Acknowledgment::PubRel(id)
            | Acknowledgment::PubComp(id) => id,
        }
    }

    /// Packet queued to a session holding a matching in-flight entry
    pub fn echo(self) -> Option<Packet> {
        match self {
            Acknowledgment::PubAck(_) => None,
            Acknowledgment::PubRec(id) => Some(Packet::PubRec(PubRecPacket::new(id))),
            Acknowledgment::PubRel(id) => Some(Packet::PubRel(PubRelPacket::new(id))),
            Acknowledgment::PubComp(id) => Some(Packet::PubComp(PubCompPacket::new(id))),
        }
    }

    /// Whether this step completes the exchange
    pub const fn completes(self) -> bool {
        matches!(self, Acknowledgment::PubAck(_) | Acknowledgment::PubComp(_))
    }
}

/// Which sessions an acknowledgment may resolve
pub trait AckScope {
    fn applies_to(&self, origin: SessionId, candidate: SessionId) -> bool;
}

/// Every registered session is a candidate. Identifiers are broker-wide.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastScope;

impl AckScope for BroadcastScope {
    fn applies_to(&self, _origin: SessionId, _candidate: SessionId) -> bool {
        true
    }
}

/// Only the session that sent the acknowledgment is a candidate
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginScope;

impl AckScope for OriginScope {
    fn applies_to(&self, origin: SessionId, candidate: SessionId) -> bool {
        origin == candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::PubAckPacket;

    #[test]
    fn test_from_packet() {
        assert_eq!(
            Acknowledgment::from_packet(&Packet::PubAck(PubAckPacket::new(4))),
            Some(Acknowledgment::PubAck(4))
        );
        assert_eq!(
            Acknowledgment::from_packet(&Packet::PingReq(crate::protocol::packets::PingReqPacket)),
            None
        );
    }

    #[test]
    fn test_transitions() {
        assert_eq!(Acknowledgment::PubAck(1).echo(), None);
        assert!(Acknowledgment::PubAck(1).completes());
        assert_eq!(
            Acknowledgment::PubRec(2).echo(),
            Some(Packet::PubRec(PubRecPacket::new(2)))
        );
        assert!(!Acknowledgment::PubRec(2).completes());
        assert_eq!(
            Acknowledgment::PubRel(3).echo(),
            Some(Packet::PubRel(PubRelPacket::new(3)))
        );
        assert!(!Acknowledgment::PubRel(3).completes());
        assert_eq!(
            Acknowledgment::PubComp(4).echo(),
            Some(Packet::PubComp(PubCompPacket::new(4)))
        );
        assert!(Acknowledgment::PubComp(4).completes());
    }

    #[test]
    fn test_scopes() {
        assert!(BroadcastScope.applies_to(1, 2));
        assert!(OriginScope.applies_to(1, 1));
        assert!(!OriginScope.applies_to(1, 2));
    }
}
