use alloc::vec::Vec;

use bytes::Bytes;

use crate::protocol::packets::PacketEncoder;
use crate::protocol::utils::{read_packet_id, read_string, write_string};
use crate::protocol::{PacketType, ProtocolError, QoS};
use crate::topics::TopicName;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct PublishFlags {
    dup: bool,
    qos: QoS,
    retain: bool,
}

impl PublishFlags {
    const fn to_nibble(self) -> u8 {
        let dup = if self.dup { 1u8 } else { 0u8 };
        let retain = if self.retain { 1u8 } else { 0u8 };
        (dup << 3) | ((self.qos as u8) << 1) | retain
    }

    fn from_nibble(nibble: u8) -> Result<Self, ProtocolError> {
        Ok(PublishFlags {
            dup: (nibble & 0b1000) != 0,
            qos: QoS::from_u8((nibble >> 1) & 0b11)?,
            retain: (nibble & 0b0001) != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic_name: TopicName,
    /// Present iff `qos > 0`
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
}

impl PublishPacket {
    /// QoS 0, non-retained publication
    pub fn new(topic_name: TopicName, payload: impl Into<Bytes>) -> Self {
        PublishPacket {
            topic_name,
            packet_id: None,
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            dup: false,
            retain: false,
        }
    }

    /// Sets the delivery level; the identifier is dropped for QoS 0
    pub fn with_qos(mut self, qos: QoS, packet_id: u16) -> Self {
        self.qos = qos;
        self.packet_id = qos.requires_packet_id().then_some(packet_id);
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    fn flags(&self) -> PublishFlags {
        PublishFlags {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }
}

impl PacketEncoder for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn fixed_flags(&self) -> u8 {
        self.flags().to_nibble()
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_string(self.topic_name.as_str(), out)?;
        if self.qos.requires_packet_id() {
            let packet_id = self
                .packet_id
                .filter(|id| *id != 0)
                .ok_or(ProtocolError::MissingPacketId)?;
            out.extend_from_slice(&packet_id.to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    fn decode_body(body: &[u8], header: u8) -> Result<Self, ProtocolError> {
        let flags = PublishFlags::from_nibble(header & 0x0F)?;
        let mut offset = 0;

        let topic_name = TopicName::new(read_string(body, &mut offset)?)?;
        let packet_id = if flags.qos.requires_packet_id() {
            Some(read_packet_id(body, &mut offset)?)
        } else {
            None
        };
        let payload = Bytes::copy_from_slice(&body[offset..]);

        Ok(PublishPacket {
            topic_name,
            packet_id,
            payload,
            qos: flags.qos,
            dup: flags.dup,
            retain: flags.retain,
        })
    }
}
