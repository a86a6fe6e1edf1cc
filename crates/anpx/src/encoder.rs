//! Frame encoder with optional chunk splitting.

use crate::error::CodecError;
use crate::header::FLAG_CHUNKED;
use crate::message::{AnpxMessage, ChunkInfo, TlvTag, build_frame};

/// Default payload size above which a message is split into chunks.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Encodes logical messages into wire frames.
///
/// Without a chunk size every message becomes exactly one frame. With one,
/// a message whose encoded TLV body exceeds the limit is split: each chunk
/// frame carries the request id, a [`ChunkInfo`] descriptor (index, total,
/// and the CRC-32 of the complete logical body), and one slice of that body,
/// and is independently checksummed.
#[derive(Debug, Clone, Default)]
pub struct AnpxEncoder {
    chunk_size: Option<usize>,
}

impl AnpxEncoder {
    /// Creates an encoder that never chunks.
    #[must_use]
    pub const fn new() -> Self {
        Self { chunk_size: None }
    }

    /// Creates an encoder that splits bodies larger than `chunk_size` bytes.
    #[must_use]
    pub const fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: Some(chunk_size),
        }
    }

    /// Encodes a message into one or more wire frames.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] when a message that needs
    /// splitting has no request id to key its chunks, and
    /// [`CodecError::MessageTooLarge`] when a body cannot be framed.
    pub fn encode(&self, message: &AnpxMessage) -> Result<Vec<Vec<u8>>, CodecError> {
        let body = message.encode_body();
        match self.chunk_size {
            Some(limit) if limit > 0 && body.len() > limit => {
                Self::encode_chunks(message, &body, limit)
            }
            _ => Ok(vec![build_frame(message.message_type, 0, &body)?]),
        }
    }

    fn encode_chunks(
        message: &AnpxMessage,
        body: &[u8],
        limit: usize,
    ) -> Result<Vec<Vec<u8>>, CodecError> {
        let request_id = message.request_id().ok_or(CodecError::MissingField {
            tag: TlvTag::RequestId.as_byte(),
        })?;
        let total = u32::try_from(body.len().div_ceil(limit))
            .map_err(|_| CodecError::MessageTooLarge(body.len()))?;
        let aggregate_crc = crc32fast::hash(body);

        let mut frames = Vec::with_capacity(total as usize);
        for (index, slice) in body.chunks(limit).enumerate() {
            let info = ChunkInfo {
                index: index as u32,
                total,
                aggregate_crc,
            };
            let mut chunk = AnpxMessage::new(message.message_type);
            chunk.add_field(TlvTag::RequestId, request_id.as_bytes());
            chunk.add_field(TlvTag::ChunkInfo, &info.serialize());
            chunk.add_field(TlvTag::ChunkData, slice);
            frames.push(build_frame(
                message.message_type,
                FLAG_CHUNKED,
                &chunk.encode_body(),
            )?);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{AnpxHeader, HEADER_LEN, MessageType};
    use crate::meta::HttpMeta;

    #[test]
    fn small_message_is_one_frame() {
        let msg = AnpxMessage::request("id-1", &HttpMeta::new("GET", "/"), b"tiny").unwrap();
        let frames = AnpxEncoder::with_chunk_size(1024).encode(&msg).unwrap();
        assert_eq!(frames.len(), 1);
        let header = AnpxHeader::parse(&frames[0]).unwrap();
        assert!(!header.is_chunked());
    }

    #[test]
    fn oversize_body_splits_into_chunked_frames() {
        let body = vec![0x5Au8; 700];
        let msg = AnpxMessage::request("id-2", &HttpMeta::new("POST", "/upload"), &body).unwrap();
        let frames = AnpxEncoder::with_chunk_size(256).encode(&msg).unwrap();
        assert!(frames.len() > 1);
        for frame in &frames {
            let header = AnpxHeader::parse(frame).unwrap();
            assert!(header.is_chunked());
            assert_eq!(header.message_type, MessageType::HttpRequest);
            assert!(frame.len() <= HEADER_LEN + 256 + 128, "chunk overhead blew up");
        }
    }

    #[test]
    fn chunking_without_request_id_is_an_error() {
        let mut msg = AnpxMessage::new(MessageType::HttpResponse);
        msg.add_field(TlvTag::HttpBody, &vec![0u8; 512]);
        let result = AnpxEncoder::with_chunk_size(64).encode(&msg);
        assert!(matches!(
            result,
            Err(CodecError::MissingField { tag: 0x01 })
        ));
    }

    #[test]
    fn plain_encoder_never_chunks() {
        let body = vec![1u8; 100_000];
        let msg = AnpxMessage::request("id-3", &HttpMeta::new("PUT", "/blob"), &body).unwrap();
        let frames = AnpxEncoder::new().encode(&msg).unwrap();
        assert_eq!(frames.len(), 1);
    }
}
