#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Subscription or unsubscription carries no topic
    EmptyTopicList,
    /// Incomplete packet (not enough data)
    IncompletePacket { available: usize },
    /// Invalid connect flags in CONNECT
    InvalidConnectFlags { flags: u8 },
    /// Invalid connect return code in CONNACK
    InvalidConnectReturnCode { return_code: u8 },
    /// Fixed header flags do not match the packet type
    InvalidFixedHeaderFlags { expected: u8, actual: u8 },
    /// Variable length integer is longer than four bytes
    InvalidLengthEncoding,
    /// Packet length does not match expected length
    InvalidPacketLength { expected: usize, actual: usize },
    /// Invalid packet type
    InvalidPacketType { packet_type: u8 },
    /// Invalid QoS level
    InvalidQosLevel { level: u8 },
    /// Invalid session present flag in CONNACK
    InvalidSessionPresentFlag { flag: u8 },
    /// Invalid return code in SUBACK
    InvalidSubAckReturnCode { return_code: u8 },
    /// Invalid UTF-8 string
    InvalidUtf8String,
    /// Missing Packet Identifier where one is required
    MissingPacketId,
    /// Packet exceeds the configured maximum size
    PacketTooLarge { max_size: usize, actual_size: usize },
    /// String or binary field longer than a two byte length prefix allows
    StringTooLong { length: usize },
    /// Topic name is empty
    TopicEmpty,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::EmptyTopicList => write!(f, "Packet carries no topic"),
            ProtocolError::IncompletePacket { available } => {
                write!(f, "Incomplete packet: available {}", available)
            }
            ProtocolError::InvalidConnectFlags { flags } => {
                write!(f, "Invalid connect flags in CONNECT packet: {:#010b}", flags)
            }
            ProtocolError::InvalidConnectReturnCode { return_code } => {
                write!(f, "Invalid connect return code in CONNACK: {}", return_code)
            }
            ProtocolError::InvalidFixedHeaderFlags { expected, actual } => {
                write!(
                    f,
                    "Invalid fixed header flags: expected {:04b}, actual {:04b}",
                    expected, actual
                )
            }
            ProtocolError::InvalidLengthEncoding => {
                write!(f, "Invalid variable length integer encoding")
            }
            ProtocolError::InvalidPacketLength { expected, actual } => {
                write!(
                    f,
                    "Invalid packet length: expected {}, got {}",
                    expected, actual
                )
            }
            ProtocolError::InvalidPacketType { packet_type } => {
                write!(f, "Invalid packet type: {}", packet_type)
            }
            ProtocolError::InvalidQosLevel { level } => {
                write!(f, "Invalid QoS level: {}", level)
            }
            ProtocolError::InvalidSessionPresentFlag { flag } => {
                write!(
                    f,
                    "Invalid session present flag in CONNACK packet: {}",
                    flag
                )
            }
            ProtocolError::InvalidSubAckReturnCode { return_code } => {
                write!(f, "Invalid return code in SUBACK packet: {:#04x}", return_code)
            }
            ProtocolError::InvalidUtf8String => write!(f, "Invalid UTF-8 string"),
            ProtocolError::MissingPacketId => {
                write!(f, "Missing Packet Identifier where one is required")
            }
            ProtocolError::PacketTooLarge {
                max_size,
                actual_size,
            } => {
                write!(
                    f,
                    "Packet too large: size {}, max {}",
                    actual_size, max_size
                )
            }
            ProtocolError::StringTooLong { length } => {
                write!(f, "Field too long for a length prefix: {} bytes", length)
            }
            ProtocolError::TopicEmpty => write!(f, "Topic name is empty"),
        }
    }
}

impl core::error::Error for ProtocolError {}
