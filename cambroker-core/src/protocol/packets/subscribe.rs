use alloc::vec::Vec;

use crate::protocol::packets::PacketEncoder;
use crate::protocol::utils::{read_packet_id, read_string, read_u8, write_string};
use crate::protocol::{PacketType, ProtocolError, QoS};
use crate::topics::TopicName;

/// One topic filter of a SUBSCRIBE
///
/// The requested QoS byte is kept as received. Deciding what to do with a
/// value outside 0..=2 is left to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub topic: TopicName,
    pub requested_qos: u8,
}

impl SubscriptionRequest {
    pub fn new(topic: TopicName, qos: QoS) -> Self {
        SubscriptionRequest {
            topic,
            requested_qos: qos as u8,
        }
    }

    pub fn qos(&self) -> Result<QoS, ProtocolError> {
        QoS::from_u8(self.requested_qos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub subscriptions: Vec<SubscriptionRequest>,
}

impl PacketEncoder for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn fixed_flags(&self) -> u8 {
        0b0010
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if self.subscriptions.is_empty() {
            return Err(ProtocolError::EmptyTopicList);
        }
        out.extend_from_slice(&self.packet_id.to_be_bytes());
        for request in &self.subscriptions {
            write_string(request.topic.as_str(), out)?;
            out.push(request.requested_qos);
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let packet_id = read_packet_id(body, &mut offset)?;

        let mut subscriptions = Vec::new();
        while offset < body.len() {
            let topic = TopicName::new(read_string(body, &mut offset)?)?;
            let requested_qos = read_u8(body, &mut offset)?;
            subscriptions.push(SubscriptionRequest {
                topic,
                requested_qos,
            });
        }
        if subscriptions.is_empty() {
            return Err(ProtocolError::EmptyTopicList);
        }

        Ok(SubscribePacket {
            packet_id,
            subscriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;
    use alloc::vec;

    #[test]
    fn test_subscribe_decode_two_topics() {
        let bytes = [
            0x82, 0x0C, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'b', 0x01, 0x00, 0x01, b'c', 0x02,
        ];
        let Packet::Subscribe(subscribe) = Packet::decode(&bytes).unwrap() else {
            panic!("expected SUBSCRIBE");
        };
        assert_eq!(subscribe.packet_id, 1);
        assert_eq!(subscribe.subscriptions.len(), 2);
        assert_eq!(subscribe.subscriptions[0].topic.as_str(), "a/b");
        assert_eq!(subscribe.subscriptions[0].qos(), Ok(QoS::AtLeastOnce));
        assert_eq!(subscribe.subscriptions[1].topic.as_str(), "c");
        assert_eq!(subscribe.subscriptions[1].qos(), Ok(QoS::ExactlyOnce));
    }

    #[test]
    fn test_subscribe_keeps_raw_qos() {
        let bytes = [0x82, 0x06, 0x00, 0x02, 0x00, 0x01, b'x', 0x03];
        let Packet::Subscribe(subscribe) = Packet::decode(&bytes).unwrap() else {
            panic!("expected SUBSCRIBE");
        };
        assert_eq!(subscribe.subscriptions[0].requested_qos, 3);
        assert!(subscribe.subscriptions[0].qos().is_err());
    }

    #[test]
    fn test_subscribe_encode() {
        let packet = SubscribePacket {
            packet_id: 9,
            subscriptions: vec![SubscriptionRequest::new(
                TopicName::try_from("t").unwrap(),
                QoS::AtMostOnce,
            )],
        };
        let bytes = Packet::from(packet).to_bytes().unwrap();
        assert_eq!(bytes, [0x82, 0x06, 0x00, 0x09, 0x00, 0x01, b't', 0x00]);
    }

    #[test]
    fn test_subscribe_without_topics() {
        assert_eq!(
            Packet::decode(&[0x82, 0x02, 0x00, 0x01]),
            Err(ProtocolError::EmptyTopicList)
        );
    }

    #[test]
    fn test_subscribe_truncated_qos() {
        assert_eq!(
            Packet::decode(&[0x82, 0x05, 0x00, 0x01, 0x00, 0x01, b't']),
            Err(ProtocolError::IncompletePacket { available: 5 })
        );
    }
}
