use alloc::vec::Vec;

use crate::protocol::packets::PacketEncoder;
use crate::protocol::utils::{read_packet_id, read_u8};
use crate::protocol::{PacketType, ProtocolError, QoS};

const FAILURE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReturnCode {
    Granted(QoS),
    Failure,
}

impl SubAckReturnCode {
    pub const fn to_u8(self) -> u8 {
        match self {
            SubAckReturnCode::Granted(qos) => qos as u8,
            SubAckReturnCode::Failure => FAILURE,
        }
    }

    pub fn from_u8(return_code: u8) -> Result<Self, ProtocolError> {
        match return_code {
            FAILURE => Ok(SubAckReturnCode::Failure),
            code => QoS::from_u8(code)
                .map(SubAckReturnCode::Granted)
                .map_err(|_| ProtocolError::InvalidSubAckReturnCode { return_code }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

impl PacketEncoder for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.extend_from_slice(&self.packet_id.to_be_bytes());
        out.extend(self.return_codes.iter().map(|code| code.to_u8()));
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let packet_id = read_packet_id(body, &mut offset)?;
        let mut return_codes = Vec::with_capacity(body.len() - offset);
        while offset < body.len() {
            return_codes.push(SubAckReturnCode::from_u8(read_u8(body, &mut offset)?)?);
        }
        Ok(SubAckPacket {
            packet_id,
            return_codes,
        })
    }
}
