mod connack;
mod connect;
mod disconnect;
mod pingreq;
mod pingresp;
mod puback;
mod pubcomp;
mod publish;
mod pubrec;
mod pubrel;
mod suback;
mod subscribe;
mod unsuback;
mod unsubscribe;

pub use crate::protocol::packets::connack::{ConnAckPacket, ConnectReturnCode};
pub use crate::protocol::packets::connect::{ConnectPacket, Will, PROTOCOL_LEVEL, PROTOCOL_NAME};
pub use crate::protocol::packets::disconnect::DisconnectPacket;
pub use crate::protocol::packets::pingreq::PingReqPacket;
pub use crate::protocol::packets::pingresp::PingRespPacket;
pub use crate::protocol::packets::puback::PubAckPacket;
pub use crate::protocol::packets::pubcomp::PubCompPacket;
pub use crate::protocol::packets::publish::PublishPacket;
pub use crate::protocol::packets::pubrec::PubRecPacket;
pub use crate::protocol::packets::pubrel::PubRelPacket;
pub use crate::protocol::packets::suback::{SubAckPacket, SubAckReturnCode};
pub use crate::protocol::packets::subscribe::{SubscribePacket, SubscriptionRequest};
pub use crate::protocol::packets::unsuback::UnsubAckPacket;
pub use crate::protocol::packets::unsubscribe::UnsubscribePacket;

use alloc::vec::Vec;

use crate::protocol::utils::{read_packet_id, read_variable_length, write_variable_length};
use crate::protocol::{PacketType, ProtocolError};

pub trait PacketEncoder: Sized {
    fn packet_type(&self) -> PacketType;
    fn fixed_flags(&self) -> u8 {
        0b0000
    }
    fn header_first_byte(&self) -> u8 {
        (self.packet_type() as u8) << 4 | (self.fixed_flags() & 0x0F)
    }
    /// Writes the variable header and payload, without the fixed header
    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError>;
    /// Parses the bytes that follow the fixed header
    fn decode_body(body: &[u8], header: u8) -> Result<Self, ProtocolError>;
}

/// Body of the packets that carry nothing but a packet identifier
pub(crate) fn decode_packet_id_body(body: &[u8]) -> Result<u16, ProtocolError> {
    if body.len() != 2 {
        return Err(ProtocolError::InvalidPacketLength {
            expected: 2,
            actual: body.len(),
        });
    }
    let mut offset = 0;
    read_packet_id(body, &mut offset)
}

/// Body of the packets that carry nothing at all
pub(crate) fn expect_empty_body(body: &[u8]) -> Result<(), ProtocolError> {
    if !body.is_empty() {
        return Err(ProtocolError::InvalidPacketLength {
            expected: 0,
            actual: body.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq(_) => PacketType::PingReq,
            Packet::PingResp(_) => PacketType::PingResp,
            Packet::Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// Packet identifier, for the packet types that carry one
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(packet) => packet.packet_id,
            Packet::PubAck(packet) => Some(packet.packet_id),
            Packet::PubRec(packet) => Some(packet.packet_id),
            Packet::PubRel(packet) => Some(packet.packet_id),
            Packet::PubComp(packet) => Some(packet.packet_id),
            Packet::Subscribe(packet) => Some(packet.packet_id),
            Packet::SubAck(packet) => Some(packet.packet_id),
            Packet::Unsubscribe(packet) => Some(packet.packet_id),
            Packet::UnsubAck(packet) => Some(packet.packet_id),
            _ => None,
        }
    }

    /// Total size of the first frame in `bytes` as declared by its fixed
    /// header, once enough of the header has arrived to know it.
    pub fn declared_length(bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(read_variable_length(&bytes[1..])?
            .map(|(remaining_length, len_bytes)| 1 + len_bytes + remaining_length))
    }

    /// Length of the first complete frame in `bytes`, `None` if more
    /// bytes are needed.
    pub fn frame_length(bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        Ok(Self::declared_length(bytes)?.filter(|total| bytes.len() >= *total))
    }

    /// Decodes exactly one complete frame
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let header = *frame
            .first()
            .ok_or(ProtocolError::IncompletePacket { available: 0 })?;
        let packet_type = PacketType::from_header(header);
        if matches!(packet_type, PacketType::Reserved | PacketType::Reserved2) {
            return Err(ProtocolError::InvalidPacketType {
                packet_type: header >> 4,
            });
        }
        if let Some(expected) = packet_type.required_flags() {
            let actual = header & 0x0F;
            if actual != expected {
                return Err(ProtocolError::InvalidFixedHeaderFlags { expected, actual });
            }
        }

        let (remaining_length, len_bytes) = read_variable_length(&frame[1..])?.ok_or(
            ProtocolError::IncompletePacket {
                available: frame.len(),
            },
        )?;
        let body_start = 1 + len_bytes;
        let total = body_start + remaining_length;
        if frame.len() < total {
            return Err(ProtocolError::IncompletePacket {
                available: frame.len(),
            });
        }
        if frame.len() > total {
            return Err(ProtocolError::InvalidPacketLength {
                expected: total,
                actual: frame.len(),
            });
        }
        let body = &frame[body_start..];

        match packet_type {
            PacketType::Connect => ConnectPacket::decode_body(body, header).map(Packet::Connect),
            PacketType::ConnAck => ConnAckPacket::decode_body(body, header).map(Packet::ConnAck),
            PacketType::Publish => PublishPacket::decode_body(body, header).map(Packet::Publish),
            PacketType::PubAck => PubAckPacket::decode_body(body, header).map(Packet::PubAck),
            PacketType::PubRec => PubRecPacket::decode_body(body, header).map(Packet::PubRec),
            PacketType::PubRel => PubRelPacket::decode_body(body, header).map(Packet::PubRel),
            PacketType::PubComp => PubCompPacket::decode_body(body, header).map(Packet::PubComp),
            PacketType::Subscribe => {
                SubscribePacket::decode_body(body, header).map(Packet::Subscribe)
            }
            PacketType::SubAck => SubAckPacket::decode_body(body, header).map(Packet::SubAck),
            PacketType::Unsubscribe => {
                UnsubscribePacket::decode_body(body, header).map(Packet::Unsubscribe)
            }
            PacketType::UnsubAck => {
                UnsubAckPacket::decode_body(body, header).map(Packet::UnsubAck)
            }
            PacketType::PingReq => PingReqPacket::decode_body(body, header).map(Packet::PingReq),
            PacketType::PingResp => {
                PingRespPacket::decode_body(body, header).map(Packet::PingResp)
            }
            PacketType::Disconnect => {
                DisconnectPacket::decode_body(body, header).map(Packet::Disconnect)
            }
            PacketType::Reserved | PacketType::Reserved2 => Err(ProtocolError::InvalidPacketType {
                packet_type: header >> 4,
            }),
        }
    }

    /// Appends the complete frame, fixed header included, to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let mut body = Vec::new();
        let header = match self {
            Packet::Connect(packet) => encode_parts(packet, &mut body)?,
            Packet::ConnAck(packet) => encode_parts(packet, &mut body)?,
            Packet::Publish(packet) => encode_parts(packet, &mut body)?,
            Packet::PubAck(packet) => encode_parts(packet, &mut body)?,
            Packet::PubRec(packet) => encode_parts(packet, &mut body)?,
            Packet::PubRel(packet) => encode_parts(packet, &mut body)?,
            Packet::PubComp(packet) => encode_parts(packet, &mut body)?,
            Packet::Subscribe(packet) => encode_parts(packet, &mut body)?,
            Packet::SubAck(packet) => encode_parts(packet, &mut body)?,
            Packet::Unsubscribe(packet) => encode_parts(packet, &mut body)?,
            Packet::UnsubAck(packet) => encode_parts(packet, &mut body)?,
            Packet::PingReq(packet) => encode_parts(packet, &mut body)?,
            Packet::PingResp(packet) => encode_parts(packet, &mut body)?,
            Packet::Disconnect(packet) => encode_parts(packet, &mut body)?,
        };

        out.reserve(1 + 4 + body.len());
        out.push(header);
        write_variable_length(body.len(), out)?;
        out.extend_from_slice(&body);
        Ok(())
    }

    /// Encodes into a freshly allocated buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }
}

fn encode_parts<P: PacketEncoder>(packet: &P, body: &mut Vec<u8>) -> Result<u8, ProtocolError> {
    packet.encode_body(body)?;
    Ok(packet.header_first_byte())
}

macro_rules! impl_from_packet {
    ($($variant:ident => $packet:ty),* $(,)?) => {
        $(
            impl From<$packet> for Packet {
                fn from(packet: $packet) -> Self {
                    Packet::$variant(packet)
                }
            }
        )*
    };
}

impl_from_packet! {
    Connect => ConnectPacket,
    ConnAck => ConnAckPacket,
    Publish => PublishPacket,
    PubAck => PubAckPacket,
    PubRec => PubRecPacket,
    PubRel => PubRelPacket,
    PubComp => PubCompPacket,
    Subscribe => SubscribePacket,
    SubAck => SubAckPacket,
    Unsubscribe => UnsubscribePacket,
    UnsubAck => UnsubAckPacket,
    PingReq => PingReqPacket,
    PingResp => PingRespPacket,
    Disconnect => DisconnectPacket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length_waits_for_full_frame() {
        assert_eq!(Packet::frame_length(&[]), Ok(None));
        assert_eq!(Packet::frame_length(&[0x30]), Ok(None));
        assert_eq!(Packet::frame_length(&[0x30, 0x05, 0x00]), Ok(None));
        assert_eq!(Packet::frame_length(&[0xC0, 0x00, 0xE0]), Ok(Some(2)));
    }

    #[test]
    fn test_declared_length_before_body_arrives() {
        assert_eq!(Packet::declared_length(&[0x30, 0xC1, 0x02]), Ok(Some(324)));
    }

    #[test]
    fn test_decode_rejects_reserved_types() {
        assert_eq!(
            Packet::decode(&[0x00, 0x00]),
            Err(ProtocolError::InvalidPacketType { packet_type: 0 })
        );
        assert_eq!(
            Packet::decode(&[0xF0, 0x00]),
            Err(ProtocolError::InvalidPacketType { packet_type: 15 })
        );
    }

    #[test]
    fn test_decode_rejects_bad_fixed_flags() {
        assert_eq!(
            Packet::decode(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x00]),
            Err(ProtocolError::InvalidFixedHeaderFlags {
                expected: 0b0010,
                actual: 0b0000,
            })
        );
        assert_eq!(
            Packet::decode(&[0xC1, 0x00]),
            Err(ProtocolError::InvalidFixedHeaderFlags {
                expected: 0b0000,
                actual: 0b0001,
            })
        );
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        assert_eq!(
            Packet::decode(&[0x40, 0x02, 0x00]),
            Err(ProtocolError::IncompletePacket { available: 3 })
        );
        assert_eq!(
            Packet::decode(&[0xC0, 0x00, 0x00]),
            Err(ProtocolError::InvalidPacketLength {
                expected: 2,
                actual: 3,
            })
        );
    }

    #[test]
    fn test_packet_id_accessor() {
        let packet = Packet::decode(&[0x40, 0x02, 0x12, 0x34]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::PubAck);
        assert_eq!(packet.packet_id(), Some(0x1234));
        assert_eq!(Packet::from(PingReqPacket).packet_id(), None);
    }
}
