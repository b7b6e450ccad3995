use alloc::vec::Vec;

use crate::protocol::packets::{expect_empty_body, PacketEncoder};
use crate::protocol::{PacketType, ProtocolError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingRespPacket;

impl PacketEncoder for PingRespPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingResp
    }

    fn encode_body(&self, _out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        expect_empty_body(body)?;
        Ok(PingRespPacket)
    }
}
