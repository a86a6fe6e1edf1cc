//! Fixed-size ANPX frame header.
//!
//! Every frame starts with a 20-byte preamble: magic, version, message type,
//! flags, reserved byte, total length, and two CRC-32 checksums. The header
//! checksum covers bytes 0..12 (everything before the checksum fields); the
//! body checksum covers the full body that follows the header.

use crate::error::CodecError;

/// Magic bytes opening every ANPX frame.
pub const MAGIC: [u8; 4] = *b"ANPX";
/// Protocol version this codec speaks.
pub const PROTOCOL_VERSION: u8 = 0x01;
/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 20;
/// Flags bit 0: the frame carries one chunk of a larger logical message.
pub const FLAG_CHUNKED: u8 = 0x01;

/// Number of leading header bytes covered by the header checksum.
const HEADER_CRC_SCOPE: usize = 12;

/// Reads a big-endian u32 at a fixed offset. Callers must have checked the
/// slice length.
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// An HTTP-shaped request from the gateway.
    HttpRequest = 0x01,
    /// An HTTP-shaped response back to the gateway.
    HttpResponse = 0x02,
    /// A peer-reported error condition.
    Error = 0x03,
    /// Application-level keepalive request.
    Ping = 0x04,
    /// Application-level keepalive response.
    Pong = 0x05,
}

impl MessageType {
    /// Maps a wire byte to a message type.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::HttpRequest),
            0x02 => Some(Self::HttpResponse),
            0x03 => Some(Self::Error),
            0x04 => Some(Self::Ping),
            0x05 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Returns the wire byte for this message type.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Parsed ANPX frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnpxHeader {
    /// Protocol version of the frame.
    pub version: u8,
    /// Message type of the frame.
    pub message_type: MessageType,
    /// Flag bits (`FLAG_CHUNKED` is the only defined bit).
    pub flags: u8,
    /// Total frame length in bytes, header included.
    pub total_length: u32,
    /// CRC-32 over the frame body.
    pub body_crc: u32,
}

impl AnpxHeader {
    /// Builds a header for a body of the given length and checksum.
    #[must_use]
    pub fn new(message_type: MessageType, flags: u8, body_len: u32, body_crc: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type,
            flags,
            total_length: body_len + HEADER_LEN as u32,
            body_crc,
        }
    }

    /// Returns `true` if the chunked flag bit is set.
    #[must_use]
    pub const fn is_chunked(&self) -> bool {
        self.flags & FLAG_CHUNKED != 0
    }

    /// Length of the body this header describes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        (self.total_length as usize).saturating_sub(HEADER_LEN)
    }

    /// Serializes the header, computing the header checksum.
    #[must_use]
    pub fn serialize(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version;
        buf[5] = self.message_type.as_byte();
        buf[6] = self.flags;
        buf[7] = 0; // reserved
        buf[8..12].copy_from_slice(&self.total_length.to_be_bytes());
        let header_crc = crc32fast::hash(&buf[..HEADER_CRC_SCOPE]);
        buf[12..16].copy_from_slice(&header_crc.to_be_bytes());
        buf[16..20].copy_from_slice(&self.body_crc.to_be_bytes());
        buf
    }

    /// Parses a header from the first `HEADER_LEN` bytes of `data`.
    ///
    /// Validates magic, version, message type, and the header checksum.
    /// Length-range validation against a configured maximum is the frame
    /// decoder's job.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the slice is shorter than a header or any
    /// structural check fails.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::BadFrameLength {
                min: HEADER_LEN,
                max: u32::MAX as usize,
                actual: data.len(),
            });
        }
        let magic = [data[0], data[1], data[2], data[3]];
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let expected = read_u32(data, 12);
        let actual = crc32fast::hash(&data[..HEADER_CRC_SCOPE]);
        if expected != actual {
            return Err(CodecError::HeaderCrcMismatch { expected, actual });
        }
        let version = data[4];
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let message_type =
            MessageType::from_byte(data[5]).ok_or(CodecError::UnknownMessageType(data[5]))?;
        let flags = data[6];
        let total_length = read_u32(data, 8);
        let body_crc = read_u32(data, 16);
        Ok(Self {
            version,
            message_type,
            flags,
            total_length,
            body_crc,
        })
    }
}
