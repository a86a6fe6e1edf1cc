//! TLV fields and the logical ANPX message.
//!
//! A frame body is a sequence of tag-length-value fields: tag byte, length
//! as a big-endian u32, then the raw value. Unknown tags are carried through
//! untouched so newer peers can add fields without breaking older ones.

use crate::error::CodecError;
use crate::header::{AnpxHeader, HEADER_LEN, MessageType};
use crate::meta::{HttpMeta, RespMeta};

/// Bytes of TLV overhead per field (tag byte + u32 length).
pub const TLV_OVERHEAD: usize = 5;

/// Serialized size of a [`ChunkInfo`] value.
pub const CHUNK_INFO_LEN: usize = 12;

/// TLV field tags.
///
/// The first four match the operational fields of the protocol; the chunk
/// tags describe split payloads. Tags outside this set decode to
/// [`TlvTag::Unknown`] and re-encode byte-identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlvTag {
    /// Request correlation id (UTF-8).
    RequestId,
    /// HTTP request metadata (JSON, see [`HttpMeta`]).
    HttpMeta,
    /// Raw HTTP body bytes.
    HttpBody,
    /// HTTP response metadata (JSON, see [`RespMeta`]).
    RespMeta,
    /// Chunk descriptor: index, total, aggregate checksum.
    ChunkInfo,
    /// One slice of a chunked logical body.
    ChunkData,
    /// A tag this codec does not interpret; preserved as-is.
    Unknown(u8),
}

impl TlvTag {
    /// Maps a wire byte to a tag. Never fails; unassigned bytes become
    /// [`TlvTag::Unknown`].
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::RequestId,
            0x02 => Self::HttpMeta,
            0x03 => Self::HttpBody,
            0x04 => Self::RespMeta,
            0x05 => Self::ChunkInfo,
            0x06 => Self::ChunkData,
            other => Self::Unknown(other),
        }
    }

    /// Returns the wire byte for this tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::RequestId => 0x01,
            Self::HttpMeta => 0x02,
            Self::HttpBody => 0x03,
            Self::RespMeta => 0x04,
            Self::ChunkInfo => 0x05,
            Self::ChunkData => 0x06,
            Self::Unknown(other) => other,
        }
    }
}

/// One tag-length-value field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvField {
    /// Field tag.
    pub tag: TlvTag,
    /// Raw field value.
    pub value: Vec<u8>,
}

/// Chunk descriptor carried in every chunk frame of a split message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Zero-based index of this chunk.
    pub index: u32,
    /// Total number of chunks in the set.
    pub total: u32,
    /// CRC-32 over the complete logical body the set reassembles into.
    pub aggregate_crc: u32,
}

impl ChunkInfo {
    /// Serializes the descriptor to its fixed wire form.
    #[must_use]
    pub fn serialize(&self) -> [u8; CHUNK_INFO_LEN] {
        let mut buf = [0u8; CHUNK_INFO_LEN];
        buf[0..4].copy_from_slice(&self.index.to_be_bytes());
        buf[4..8].copy_from_slice(&self.total.to_be_bytes());
        buf[8..12].copy_from_slice(&self.aggregate_crc.to_be_bytes());
        buf
    }

    /// Parses a descriptor from a TLV value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TruncatedField`] if the value is not exactly
    /// `CHUNK_INFO_LEN` bytes.
    pub fn parse(value: &[u8]) -> Result<Self, CodecError> {
        if value.len() != CHUNK_INFO_LEN {
            return Err(CodecError::TruncatedField {
                tag: TlvTag::ChunkInfo.as_byte(),
            });
        }
        Ok(Self {
            index: u32::from_be_bytes([value[0], value[1], value[2], value[3]]),
            total: u32::from_be_bytes([value[4], value[5], value[6], value[7]]),
            aggregate_crc: u32::from_be_bytes([value[8], value[9], value[10], value[11]]),
        })
    }
}

/// Outcome of attempting to decode one frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    /// The buffer does not yet hold a complete frame.
    NeedMore,
    /// A complete frame was decoded.
    Complete {
        /// The decoded message (a chunk frame if `chunked` is set).
        message: AnpxMessage,
        /// Whether the frame's chunked flag was set.
        chunked: bool,
        /// Bytes consumed from the front of the buffer.
        consumed: usize,
    },
}

/// A logical ANPX message: a type plus its TLV fields.
///
/// Constructed by the decoder on a full decode, or locally when building a
/// response. Field order is preserved through an encode/decode round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnpxMessage {
    /// Message type from the frame header.
    pub message_type: MessageType,
    fields: Vec<TlvField>,
}

impl AnpxMessage {
    /// Creates an empty message of the given type.
    #[must_use]
    pub const fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            fields: Vec::new(),
        }
    }

    /// Builds an HTTP request message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadMeta`] if the metadata cannot be serialized.
    pub fn request(request_id: &str, meta: &HttpMeta, body: &[u8]) -> Result<Self, CodecError> {
        let mut msg = Self::new(MessageType::HttpRequest);
        msg.add_field(TlvTag::RequestId, request_id.as_bytes());
        let meta_json =
            serde_json::to_vec(meta).map_err(|e| CodecError::BadMeta(e.to_string()))?;
        msg.add_field(TlvTag::HttpMeta, &meta_json);
        if !body.is_empty() {
            msg.add_field(TlvTag::HttpBody, body);
        }
        Ok(msg)
    }

    /// Builds an HTTP response message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadMeta`] if the metadata cannot be serialized.
    pub fn response(request_id: &str, meta: &RespMeta, body: &[u8]) -> Result<Self, CodecError> {
        let mut msg = Self::new(MessageType::HttpResponse);
        msg.add_field(TlvTag::RequestId, request_id.as_bytes());
        let meta_json =
            serde_json::to_vec(meta).map_err(|e| CodecError::BadMeta(e.to_string()))?;
        msg.add_field(TlvTag::RespMeta, &meta_json);
        if !body.is_empty() {
            msg.add_field(TlvTag::HttpBody, body);
        }
        Ok(msg)
    }

    /// Appends a field.
    pub fn add_field(&mut self, tag: TlvTag, value: &[u8]) {
        self.fields.push(TlvField {
            tag,
            value: value.to_vec(),
        });
    }

    /// All fields, in wire order.
    #[must_use]
    pub fn fields(&self) -> &[TlvField] {
        &self.fields
    }

    /// Value of the first field with the given tag.
    #[must_use]
    pub fn field(&self, tag: TlvTag) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.value.as_slice())
    }

    /// Request id, if present and valid UTF-8.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.field(TlvTag::RequestId)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// HTTP request metadata. `Ok(None)` when the field is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadMeta`] if the field is present but not valid
    /// JSON for [`HttpMeta`].
    pub fn http_meta(&self) -> Result<Option<HttpMeta>, CodecError> {
        self.field(TlvTag::HttpMeta)
            .map(|v| serde_json::from_slice(v).map_err(|e| CodecError::BadMeta(e.to_string())))
            .transpose()
    }

    /// HTTP response metadata. `Ok(None)` when the field is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadMeta`] if the field is present but not valid
    /// JSON for [`RespMeta`].
    pub fn resp_meta(&self) -> Result<Option<RespMeta>, CodecError> {
        self.field(TlvTag::RespMeta)
            .map(|v| serde_json::from_slice(v).map_err(|e| CodecError::BadMeta(e.to_string())))
            .transpose()
    }

    /// HTTP body bytes; empty if the field is absent.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.field(TlvTag::HttpBody).unwrap_or(&[])
    }

    /// Serializes only the TLV fields (the frame body).
    #[must_use]
    pub fn encode_body(&self) -> Vec<u8> {
        let cap: usize = self
            .fields
            .iter()
            .map(|f| TLV_OVERHEAD + f.value.len())
            .sum();
        let mut buf = Vec::with_capacity(cap);
        for field in &self.fields {
            buf.push(field.tag.as_byte());
            buf.extend_from_slice(&(field.value.len() as u32).to_be_bytes());
            buf.extend_from_slice(&field.value);
        }
        buf
    }

    /// Serializes the message as a single unchunked frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MessageTooLarge`] if the body length does not
    /// fit the header's length field.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        build_frame(self.message_type, 0, &self.encode_body())
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns [`FrameDecode::NeedMore`] when the buffer holds less than a
    /// full frame. Structural failures (bad magic, checksum mismatch, a
    /// declared length outside `HEADER_LEN..=max_frame_len`) are errors;
    /// the caller cannot resynchronize and should discard its buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on any structural or integrity failure.
    pub fn decode_frame(buf: &[u8], max_frame_len: usize) -> Result<FrameDecode, CodecError> {
        if buf.len() < HEADER_LEN {
            return Ok(FrameDecode::NeedMore);
        }
        let header = AnpxHeader::parse(buf)?;
        let total = header.total_length as usize;
        if total < HEADER_LEN || total > max_frame_len {
            return Err(CodecError::BadFrameLength {
                min: HEADER_LEN,
                max: max_frame_len,
                actual: total,
            });
        }
        if buf.len() < total {
            return Ok(FrameDecode::NeedMore);
        }
        let body = &buf[HEADER_LEN..total];
        let actual = crc32fast::hash(body);
        if actual != header.body_crc {
            return Err(CodecError::BodyCrcMismatch {
                expected: header.body_crc,
                actual,
            });
        }
        let fields = parse_fields(body)?;
        Ok(FrameDecode::Complete {
            message: Self {
                message_type: header.message_type,
                fields,
            },
            chunked: header.is_chunked(),
            consumed: total,
        })
    }

    /// Builds a message of the given type from an already-parsed TLV body.
    pub(crate) fn from_fields(message_type: MessageType, fields: Vec<TlvField>) -> Self {
        Self {
            message_type,
            fields,
        }
    }
}

/// Serializes a header + body into one wire frame.
pub(crate) fn build_frame(
    message_type: MessageType,
    flags: u8,
    body: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let body_len = u32::try_from(body.len())
        .ok()
        .filter(|len| len.checked_add(HEADER_LEN as u32).is_some())
        .ok_or(CodecError::MessageTooLarge(body.len()))?;
    let header = AnpxHeader::new(message_type, flags, body_len, crc32fast::hash(body));
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&header.serialize());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Walks a frame body into TLV fields.
pub(crate) fn parse_fields(body: &[u8]) -> Result<Vec<TlvField>, CodecError> {
    let mut fields = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        if body.len() - offset < TLV_OVERHEAD {
            return Err(CodecError::TruncatedField { tag: body[offset] });
        }
        let tag_byte = body[offset];
        let len = u32::from_be_bytes([
            body[offset + 1],
            body[offset + 2],
            body[offset + 3],
            body[offset + 4],
        ]) as usize;
        offset += TLV_OVERHEAD;
        if body.len() - offset < len {
            return Err(CodecError::TruncatedField { tag: tag_byte });
        }
        fields.push(TlvField {
            tag: TlvTag::from_byte(tag_byte),
            value: body[offset..offset + len].to_vec(),
        });
        offset += len;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::reason_phrase;
    use std::collections::HashMap;

    fn sample_meta() -> HttpMeta {
        HttpMeta {
            method: "GET".to_string(),
            path: "/health".to_string(),
            query_params: HashMap::new(),
            headers: HashMap::from([("host".to_string(), "example.org".to_string())]),
        }
    }

    #[test]
    fn request_round_trip() {
        let msg = AnpxMessage::request("abc123", &sample_meta(), b"").unwrap();
        let bytes = msg.encode().unwrap();
        let FrameDecode::Complete {
            message,
            chunked,
            consumed,
        } = AnpxMessage::decode_frame(&bytes, 1 << 20).unwrap()
        else {
            panic!("expected a complete frame");
        };
        assert!(!chunked);
        assert_eq!(consumed, bytes.len());
        assert_eq!(message, msg);
        assert_eq!(message.request_id(), Some("abc123"));
        assert_eq!(message.http_meta().unwrap().unwrap(), sample_meta());
        assert!(message.body().is_empty());
    }

    #[test]
    fn response_round_trip_with_body() {
        let meta = RespMeta {
            status: 200,
            reason: reason_phrase(200).to_string(),
            headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
        };
        let msg = AnpxMessage::response("req-1", &meta, b"hello").unwrap();
        let bytes = msg.encode().unwrap();
        let FrameDecode::Complete { message, .. } =
            AnpxMessage::decode_frame(&bytes, 1 << 20).unwrap()
        else {
            panic!("expected a complete frame");
        };
        assert_eq!(message.resp_meta().unwrap().unwrap().status, 200);
        assert_eq!(message.body(), b"hello");
    }

    #[test]
    fn empty_body_field_is_omitted() {
        let msg = AnpxMessage::request("id", &sample_meta(), b"").unwrap();
        assert!(msg.field(TlvTag::HttpBody).is_none());
    }

    #[test]
    fn truncated_buffer_needs_more() {
        let msg = AnpxMessage::request("abc123", &sample_meta(), b"payload").unwrap();
        let bytes = msg.encode().unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(
                AnpxMessage::decode_frame(&bytes[..cut], 1 << 20).unwrap(),
                FrameDecode::NeedMore,
                "prefix of {cut} bytes should need more"
            );
        }
    }

    #[test]
    fn body_corruption_is_detected() {
        let msg = AnpxMessage::request("abc123", &sample_meta(), b"payload").unwrap();
        let bytes = msg.encode().unwrap();
        for i in HEADER_LEN..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x01;
            assert!(
                matches!(
                    AnpxMessage::decode_frame(&corrupt, 1 << 20),
                    Err(CodecError::BodyCrcMismatch { .. })
                ),
                "flipping body byte {i} went undetected"
            );
        }
    }

    #[test]
    fn header_corruption_is_detected() {
        let msg = AnpxMessage::request("abc123", &sample_meta(), b"payload").unwrap();
        let bytes = msg.encode().unwrap();
        for i in 0..HEADER_LEN {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x01;
            assert!(
                AnpxMessage::decode_frame(&corrupt, 1 << 20).is_err(),
                "flipping header byte {i} went undetected"
            );
        }
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let msg = AnpxMessage::request("abc123", &sample_meta(), &vec![0u8; 256]).unwrap();
        let bytes = msg.encode().unwrap();
        assert!(matches!(
            AnpxMessage::decode_frame(&bytes, 64),
            Err(CodecError::BadFrameLength { max: 64, .. })
        ));
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let mut msg = AnpxMessage::new(MessageType::HttpRequest);
        msg.add_field(TlvTag::RequestId, b"id-9");
        msg.add_field(TlvTag::from_byte(0x7E), b"future field");
        let bytes = msg.encode().unwrap();
        let FrameDecode::Complete { message, .. } =
            AnpxMessage::decode_frame(&bytes, 1 << 20).unwrap()
        else {
            panic!("expected a complete frame");
        };
        assert_eq!(message.field(TlvTag::Unknown(0x7E)), Some(b"future field".as_slice()));
        assert_eq!(message.encode().unwrap(), bytes);
    }

    #[test]
    fn tlv_length_overrun_is_truncated_field() {
        // Hand-build a body whose TLV length points past the end, with valid CRCs.
        let mut body = vec![TlvTag::RequestId.as_byte()];
        body.extend_from_slice(&100u32.to_be_bytes());
        body.extend_from_slice(b"short");
        let frame = build_frame(MessageType::HttpRequest, 0, &body).unwrap();
        assert!(matches!(
            AnpxMessage::decode_frame(&frame, 1 << 20),
            Err(CodecError::TruncatedField { tag: 0x01 })
        ));
    }

    #[test]
    fn chunk_info_round_trip() {
        let info = ChunkInfo {
            index: 3,
            total: 9,
            aggregate_crc: 0xCAFE_F00D,
        };
        assert_eq!(ChunkInfo::parse(&info.serialize()).unwrap(), info);
        assert!(ChunkInfo::parse(&[0u8; 11]).is_err());
    }

    #[test]
    fn duplicate_tags_resolve_to_first() {
        let mut msg = AnpxMessage::new(MessageType::HttpRequest);
        msg.add_field(TlvTag::RequestId, b"first");
        msg.add_field(TlvTag::RequestId, b"second");
        assert_eq!(msg.request_id(), Some("first"));
    }

    #[test]
    fn invalid_meta_json_is_bad_meta() {
        let mut msg = AnpxMessage::new(MessageType::HttpRequest);
        msg.add_field(TlvTag::HttpMeta, b"{not json");
        assert!(matches!(msg.http_meta(), Err(CodecError::BadMeta(_))));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_tag() -> impl Strategy<Value = TlvTag> {
        any::<u8>().prop_map(TlvTag::from_byte)
    }

    fn arb_fields() -> impl Strategy<Value = Vec<(TlvTag, Vec<u8>)>> {
        prop::collection::vec((arb_tag(), prop::collection::vec(any::<u8>(), 0..256)), 0..8)
    }

    fn arb_message_type() -> impl Strategy<Value = MessageType> {
        prop::sample::select(vec![
            MessageType::HttpRequest,
            MessageType::HttpResponse,
            MessageType::Error,
            MessageType::Ping,
            MessageType::Pong,
        ])
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(ty in arb_message_type(), fields in arb_fields()) {
            let mut msg = AnpxMessage::new(ty);
            for (tag, value) in &fields {
                msg.add_field(*tag, value);
            }
            let bytes = msg.encode().unwrap();
            let decoded = AnpxMessage::decode_frame(&bytes, 1 << 24).unwrap();
            let FrameDecode::Complete { message, consumed, .. } = decoded else {
                panic!("expected complete frame");
            };
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(message, msg);
        }

        #[test]
        fn single_byte_corruption_never_decodes_silently(
            fields in arb_fields(),
            flip in any::<usize>()
        ) {
            let mut msg = AnpxMessage::new(MessageType::HttpRequest);
            for (tag, value) in &fields {
                msg.add_field(*tag, value);
            }
            let mut bytes = msg.encode().unwrap();
            let i = flip % bytes.len();
            bytes[i] ^= 0x01;
            prop_assert!(AnpxMessage::decode_frame(&bytes, 1 << 24).is_err());
        }

        #[test]
        fn any_prefix_needs_more(fields in arb_fields(), cut in any::<usize>()) {
            let mut msg = AnpxMessage::new(MessageType::HttpResponse);
            for (tag, value) in &fields {
                msg.add_field(*tag, value);
            }
            let bytes = msg.encode().unwrap();
            let cut = cut % bytes.len();
            prop_assert_eq!(
                AnpxMessage::decode_frame(&bytes[..cut], 1 << 24).unwrap(),
                FrameDecode::NeedMore
            );
        }
    }
}
