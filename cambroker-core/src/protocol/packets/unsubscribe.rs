use alloc::vec::Vec;

use crate::protocol::packets::PacketEncoder;
use crate::protocol::utils::{read_packet_id, read_string, write_string};
use crate::protocol::{PacketType, ProtocolError};
use crate::topics::TopicName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub topics: Vec<TopicName>,
}

impl PacketEncoder for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn fixed_flags(&self) -> u8 {
        0b0010
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if self.topics.is_empty() {
            return Err(ProtocolError::EmptyTopicList);
        }
        out.extend_from_slice(&self.packet_id.to_be_bytes());
        for topic in &self.topics {
            write_string(topic.as_str(), out)?;
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let packet_id = read_packet_id(body, &mut offset)?;
        let mut topics = Vec::new();
        while offset < body.len() {
            topics.push(TopicName::new(read_string(body, &mut offset)?)?);
        }
        if topics.is_empty() {
            return Err(ProtocolError::EmptyTopicList);
        }
        Ok(UnsubscribePacket { packet_id, topics })
    }
}
