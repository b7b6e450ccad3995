use alloc::string::{String, ToString};
use alloc::vec::Vec;

use bytes::Bytes;

use crate::protocol::packets::PacketEncoder;
use crate::protocol::utils::{read_binary, read_string, read_u16, read_u8, write_binary, write_string};
use crate::protocol::{PacketType, ProtocolError, QoS};
use crate::topics::TopicName;

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

const FLAG_RESERVED: u8 = 0b0000_0001;
const FLAG_CLEAN_SESSION: u8 = 0b0000_0010;
const FLAG_WILL: u8 = 0b0000_0100;
const FLAG_WILL_QOS: u8 = 0b0001_1000;
const FLAG_WILL_RETAIN: u8 = 0b0010_0000;
const FLAG_PASSWORD: u8 = 0b0100_0000;
const FLAG_USERNAME: u8 = 0b1000_0000;

/// Last will carried in CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: TopicName,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPacket {
    pub fn new(client_id: impl Into<String>, keep_alive: u16) -> Self {
        ConnectPacket {
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_level: PROTOCOL_LEVEL,
            clean_session: true,
            keep_alive,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: &[u8]) -> Self {
        self.username = Some(username.into());
        self.password = Some(Bytes::copy_from_slice(password));
        self
    }

    /// Whether the client speaks MQTT 3.1.1
    pub fn is_supported_protocol(&self) -> bool {
        self.protocol_name == PROTOCOL_NAME && self.protocol_level == PROTOCOL_LEVEL
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL | ((will.qos as u8) << 3);
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        flags
    }
}

impl PacketEncoder for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_string(&self.protocol_name, out)?;
        out.push(self.protocol_level);
        out.push(self.connect_flags());
        out.extend_from_slice(&self.keep_alive.to_be_bytes());
        write_string(&self.client_id, out)?;
        if let Some(will) = &self.will {
            write_string(will.topic.as_str(), out)?;
            write_binary(&will.payload, out)?;
        }
        if let Some(username) = &self.username {
            write_string(username, out)?;
        }
        if let Some(password) = &self.password {
            write_binary(password, out)?;
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _header: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;

        let protocol_name = read_string(body, &mut offset)?.to_string();
        let protocol_level = read_u8(body, &mut offset)?;
        if protocol_name != PROTOCOL_NAME || protocol_level != PROTOCOL_LEVEL {
            // Layout past the level belongs to another protocol version, keep
            // only what is needed to refuse it with CONNACK(1)
            let keep_alive = body
                .get(offset + 1..offset + 3)
                .map_or(0, |bytes| u16::from_be_bytes([bytes[0], bytes[1]]));
            return Ok(ConnectPacket {
                protocol_name,
                protocol_level,
                clean_session: false,
                keep_alive,
                client_id: String::new(),
                will: None,
                username: None,
                password: None,
            });
        }
        let flags = read_u8(body, &mut offset)?;
        if flags & FLAG_RESERVED != 0 {
            return Err(ProtocolError::InvalidConnectFlags { flags });
        }
        let has_will = flags & FLAG_WILL != 0;
        if !has_will && flags & (FLAG_WILL_QOS | FLAG_WILL_RETAIN) != 0 {
            return Err(ProtocolError::InvalidConnectFlags { flags });
        }
        if flags & FLAG_PASSWORD != 0 && flags & FLAG_USERNAME == 0 {
            return Err(ProtocolError::InvalidConnectFlags { flags });
        }
        let keep_alive = read_u16(body, &mut offset)?;

        let client_id = read_string(body, &mut offset)?.to_string();

        let will = if has_will {
            let topic = TopicName::new(read_string(body, &mut offset)?)?;
            let payload = Bytes::copy_from_slice(read_binary(body, &mut offset)?);
            Some(Will {
                topic,
                payload,
                qos: QoS::from_u8((flags & FLAG_WILL_QOS) >> 3)?,
                retain: flags & FLAG_WILL_RETAIN != 0,
            })
        } else {
            None
        };

        let username = if flags & FLAG_USERNAME != 0 {
            Some(read_string(body, &mut offset)?.to_string())
        } else {
            None
        };
        let password = if flags & FLAG_PASSWORD != 0 {
            Some(Bytes::copy_from_slice(read_binary(body, &mut offset)?))
        } else {
            None
        };

        if offset != body.len() {
            return Err(ProtocolError::InvalidPacketLength {
                expected: offset,
                actual: body.len(),
            });
        }

        Ok(ConnectPacket {
            protocol_name,
            protocol_level,
            clean_session: flags & FLAG_CLEAN_SESSION != 0,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}
