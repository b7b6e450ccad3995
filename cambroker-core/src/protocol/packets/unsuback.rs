use alloc::vec::Vec;

use crate::protocol::packets::{decode_packet_id_body, PacketEncoder};
use crate::protocol::{PacketType, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

impl UnsubAckPacket {
    pub const fn new(packet_id: u16) -> Self {
        UnsubAckPacket { packet_id }
    }
}

impl PacketEncoder for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.extend_from_slice(&self.packet_id.to_be_bytes());
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        Ok(UnsubAckPacket {
            packet_id: decode_packet_id_body(body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;

    #[test]
    fn test_unsuback_encode() {
        let bytes = Packet::from(UnsubAckPacket::new(3)).to_bytes().unwrap();
        assert_eq!(bytes, [0xB0, 0x02, 0x00, 0x03]);
    }
}
