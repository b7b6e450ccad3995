use bytes::{Bytes, BytesMut};
use cambroker_core::protocol::packets::Packet;
use cambroker_core::protocol::ProtocolError;
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes shown per line of a traffic dump
const DUMP_LINE_WIDTH: usize = 16;

/// Failure while moving frames over a byte stream
#[derive(Debug)]
pub enum FrameError {
    /// The stream failed
    Io(std::io::Error),
    /// The peer closed the stream in the middle of a frame
    UnexpectedEof { available: usize },
    /// The bytes are not a valid frame
    Protocol(ProtocolError),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "I/O error: {}", e),
            FrameError::UnexpectedEof { available } => {
                write!(f, "Stream closed mid-frame after {} bytes", available)
            }
            FrameError::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            FrameError::Protocol(e) => Some(e),
            FrameError::UnexpectedEof { .. } => None,
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(error: std::io::Error) -> Self {
        FrameError::Io(error)
    }
}

impl From<ProtocolError> for FrameError {
    fn from(error: ProtocolError) -> Self {
        FrameError::Protocol(error)
    }
}

/// Read a complete MQTT packet from the stream
///
/// Returns `Ok(None)` when the peer closes the stream between frames.
/// Bytes beyond the first frame stay in `buffer` for the next call, so the
/// returned future may be dropped and recreated without losing data.
/// `dump` enables a trace-level hex dump of each frame, tagged with it.
pub async fn read_packet<R>(
    reader: &mut R,
    buffer: &mut BytesMut,
    max_packet_size: usize,
    dump: Option<&str>,
) -> Result<Option<Packet>, FrameError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match Packet::declared_length(buffer)? {
            Some(total_len) if total_len > max_packet_size => {
                return Err(FrameError::Protocol(ProtocolError::PacketTooLarge {
                    max_size: max_packet_size,
                    actual_size: total_len,
                }));
            }
            Some(total_len) if buffer.len() >= total_len => {
                let frame = buffer.split_to(total_len);
                if let Some(tag) = dump {
                    dump_frame(tag, "<-", &frame);
                }
                return Ok(Some(Packet::decode(&frame)?));
            }
            Some(total_len) => buffer.reserve(total_len - buffer.len()),
            None => buffer.reserve(5),
        }

        let n = reader.read_buf(buffer).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(FrameError::UnexpectedEof {
                available: buffer.len(),
            });
        }
    }
}

/// Encode a packet into Bytes for zero-copy transmission
pub fn encode_frame(packet: &Packet) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(packet.to_bytes()?))
}

/// Encode and write one packet, flushing the stream
pub async fn write_packet<W>(
    writer: &mut W,
    packet: &Packet,
    dump: Option<&str>,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    if let Some(tag) = dump {
        dump_frame(tag, "->", &frame);
    }
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn dump_frame(tag: &str, direction: &str, frame: &[u8]) {
    trace!("{} {} {} bytes", tag, direction, frame.len());
    for (index, line) in frame.chunks(DUMP_LINE_WIDTH).enumerate() {
        trace!(
            "{} {} {:04x}  {:<32}  {}",
            tag,
            direction,
            index * DUMP_LINE_WIDTH,
            hex::encode(line),
            printable(line)
        );
    }
}

fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| {
            if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            }
        })
        .collect()
}
