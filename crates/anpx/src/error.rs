use thiserror::Error;

/// Errors that can occur while encoding or decoding ANPX frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The frame preamble does not start with the `ANPX` magic bytes.
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),
    /// The protocol version byte is not one this codec speaks.
    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),
    /// The message type byte does not map to a known type.
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),
    /// The checksum over the header fields does not match.
    #[error("header checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HeaderCrcMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received header bytes.
        actual: u32,
    },
    /// The checksum over the frame body does not match.
    #[error("body checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    BodyCrcMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received body bytes.
        actual: u32,
    },
    /// The declared total frame length is outside the accepted range.
    #[error("frame length {actual} out of range ({min}..={max})")]
    BadFrameLength {
        /// Minimum valid total length (the header size).
        min: usize,
        /// Maximum accepted total length.
        max: usize,
        /// Declared total length.
        actual: usize,
    },
    /// A TLV field's declared length runs past the end of the body.
    #[error("truncated TLV field (tag {tag:#04x})")]
    TruncatedField {
        /// Tag byte of the truncated field.
        tag: u8,
    },
    /// A field required for this operation is absent.
    #[error("missing required field (tag {tag:#04x})")]
    MissingField {
        /// Tag byte of the missing field.
        tag: u8,
    },
    /// A chunk's index is not below its declared total.
    #[error("chunk index {index} out of range (total {total})")]
    ChunkIndexOutOfRange {
        /// Zero-based chunk index.
        index: u32,
        /// Declared chunk count.
        total: u32,
    },
    /// The same chunk index arrived twice for one request id.
    #[error("duplicate chunk index {index}")]
    DuplicateChunk {
        /// Repeated chunk index.
        index: u32,
    },
    /// A chunk's descriptor disagrees with earlier chunks of the same set.
    #[error("chunk descriptor disagrees with pending set")]
    ChunkSetMismatch,
    /// A chunk set declares or accumulates more than the configured cap.
    #[error("chunk set exceeds size limit ({actual} > {max} bytes)")]
    ChunkSetTooLarge {
        /// Bytes declared or received so far.
        actual: usize,
        /// Configured maximum logical message size.
        max: usize,
    },
    /// The checksum over the reassembled logical body does not match.
    #[error("aggregate body checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    AggregateCrcMismatch {
        /// Checksum every chunk of the set declared.
        expected: u32,
        /// Checksum computed over the reassembled bytes.
        actual: u32,
    },
    /// A metadata field did not contain valid JSON.
    #[error("invalid metadata payload: {0}")]
    BadMeta(String),
    /// The message body is too large to describe in a frame header.
    #[error("message too large to frame: {0} bytes")]
    MessageTooLarge(usize),
}
