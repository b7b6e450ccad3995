use alloc::vec::Vec;

use crate::protocol::packets::{decode_packet_id_body, PacketEncoder};
use crate::protocol::{PacketType, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubCompPacket {
    pub packet_id: u16,
}

impl PubCompPacket {
    pub const fn new(packet_id: u16) -> Self {
        PubCompPacket { packet_id }
    }
}

impl PacketEncoder for PubCompPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubComp
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.extend_from_slice(&self.packet_id.to_be_bytes());
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        Ok(PubCompPacket {
            packet_id: decode_packet_id_body(body)?,
        })
    }
}
