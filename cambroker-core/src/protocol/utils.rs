use alloc::vec::Vec;

use crate::protocol::ProtocolError;

/// Largest value a remaining-length field can carry (0x0FFF_FFFF)
pub const MAX_VARIABLE_LENGTH: usize = 268_435_455;

pub const fn variable_length_length(value: usize) -> usize {
    if value < 128 {
        1
    } else if value < 16384 {
        2
    } else if value < 2097152 {
        3
    } else {
        4
    }
}

/// Reads a remaining-length field.
///
/// Returns `Ok(None)` when the field is not yet complete, otherwise the
/// decoded value and the number of bytes it occupied.
pub fn read_variable_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for (index, byte) in bytes.iter().enumerate() {
        if index >= 4 {
            return Err(ProtocolError::InvalidLengthEncoding);
        }
        value += (*byte as usize & 0x7F) * multiplier;
        if (byte & 0x80) == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        return Err(ProtocolError::InvalidLengthEncoding);
    }
    Ok(None)
}

pub fn write_variable_length(value: usize, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if value > MAX_VARIABLE_LENGTH {
        return Err(ProtocolError::PacketTooLarge {
            max_size: MAX_VARIABLE_LENGTH,
            actual_size: value,
        });
    }

    let mut encoded = value;
    loop {
        let mut byte = (encoded & 0x7F) as u8;
        encoded >>= 7;
        if encoded > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if encoded == 0 {
            return Ok(());
        }
    }
}

pub fn read_u8(bytes: &[u8], offset: &mut usize) -> Result<u8, ProtocolError> {
    let byte = *bytes.get(*offset).ok_or(ProtocolError::IncompletePacket {
        available: bytes.len(),
    })?;
    *offset += 1;
    Ok(byte)
}

pub fn read_u16(bytes: &[u8], offset: &mut usize) -> Result<u16, ProtocolError> {
    if *offset + 2 > bytes.len() {
        return Err(ProtocolError::IncompletePacket {
            available: bytes.len(),
        });
    }
    let value = u16::from_be_bytes([bytes[*offset], bytes[*offset + 1]]);
    *offset += 2;
    Ok(value)
}

/// Reads a non-zero packet identifier
pub fn read_packet_id(bytes: &[u8], offset: &mut usize) -> Result<u16, ProtocolError> {
    match read_u16(bytes, offset)? {
        0 => Err(ProtocolError::MissingPacketId),
        id => Ok(id),
    }
}

pub fn read_binary<'a>(bytes: &'a [u8], offset: &mut usize) -> Result<&'a [u8], ProtocolError> {
    let len = read_u16(bytes, offset)? as usize;
    if *offset + len > bytes.len() {
        return Err(ProtocolError::IncompletePacket {
            available: bytes.len(),
        });
    }
    let field = &bytes[*offset..*offset + len];
    *offset += len;
    Ok(field)
}

pub fn read_string<'a>(bytes: &'a [u8], offset: &mut usize) -> Result<&'a str, ProtocolError> {
    let field = read_binary(bytes, offset)?;
    core::str::from_utf8(field).map_err(|_| ProtocolError::InvalidUtf8String)
}

pub fn write_binary(field: &[u8], out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let len = u16::try_from(field.len()).map_err(|_| ProtocolError::StringTooLong {
        length: field.len(),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(field);
    Ok(())
}

pub fn write_string(s: &str, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    write_binary(s.as_bytes(), out)
}
