//! Incremental frame decoder and chunk reassembly.
//!
//! [`AnpxDecoder`] is fed the caller's receive buffer and pulls complete
//! frames off the front. Unchunked frames surface immediately; chunk frames
//! are absorbed into a [`ChunkAssembler`] until their set completes. A broken
//! chunk set is dropped and decoding continues; a broken *frame* is an error
//! and the caller must discard its buffer — there is no way to find the next
//! frame boundary in a corrupt stream.

use crate::error::CodecError;
use crate::header::MessageType;
use crate::message::{AnpxMessage, ChunkInfo, FrameDecode, TlvTag, parse_fields};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default upper bound on a single logical message, chunked or not.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Default inactivity window after which a partial chunk set is evicted.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// Progress of one [`AnpxDecoder::decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeProgress {
    /// The buffer does not yet hold a complete frame.
    NeedMore,
    /// A chunk frame was consumed; its logical message is still incomplete.
    Buffered {
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
    },
    /// A complete logical message.
    Complete {
        /// The reassembled (or unchunked) message.
        message: AnpxMessage,
        /// Bytes to drop from the front of the buffer.
        consumed: usize,
    },
}

/// Stream decoder: frame extraction plus chunk reassembly.
#[derive(Debug)]
pub struct AnpxDecoder {
    max_message_size: usize,
    assembler: ChunkAssembler,
}

impl Default for AnpxDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_CHUNK_TIMEOUT)
    }
}

impl AnpxDecoder {
    /// Creates a decoder with the given message-size cap and chunk-set
    /// inactivity timeout. The cap bounds single frames and reassembled
    /// chunk sets alike.
    #[must_use]
    pub fn new(max_message_size: usize, chunk_timeout: Duration) -> Self {
        Self {
            max_message_size,
            assembler: ChunkAssembler::new(chunk_timeout, max_message_size),
        }
    }

    /// Attempts to decode from the front of `buf`.
    ///
    /// Chunk-reassembly failures are contained: the offending pending set is
    /// dropped, the frame's bytes are still consumed, and the stream stays
    /// decodable ([`DecodeProgress::Buffered`] is returned).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on frame-level corruption (bad magic, bad
    /// checksum, malformed TLV, length out of range). After an error the
    /// caller must discard its buffer.
    pub fn decode(&mut self, buf: &[u8]) -> Result<DecodeProgress, CodecError> {
        match AnpxMessage::decode_frame(buf, self.max_message_size)? {
            FrameDecode::NeedMore => Ok(DecodeProgress::NeedMore),
            FrameDecode::Complete {
                message,
                chunked: false,
                consumed,
            } => Ok(DecodeProgress::Complete { message, consumed }),
            FrameDecode::Complete {
                message,
                chunked: true,
                consumed,
            } => match self.assembler.accept(message) {
                Ok(Some(logical)) => Ok(DecodeProgress::Complete {
                    message: logical,
                    consumed,
                }),
                Ok(None) => Ok(DecodeProgress::Buffered { consumed }),
                Err(e) => {
                    warn!(error = %e, "dropping broken chunk set");
                    Ok(DecodeProgress::Buffered { consumed })
                }
            },
        }
    }

    /// Number of partially received chunk sets currently held.
    #[must_use]
    pub fn pending_chunk_sets(&self) -> usize {
        self.assembler.pending_sets()
    }
}

#[derive(Debug)]
struct PendingSet {
    message_type: MessageType,
    total: u32,
    aggregate_crc: u32,
    // Keyed by chunk index. Sized by what actually arrives, never by the
    // declared total, which is peer-controlled.
    chunks: HashMap<u32, Vec<u8>>,
    bytes: usize,
    last_activity: Instant,
}

impl PendingSet {
    fn new(message_type: MessageType, info: ChunkInfo) -> Self {
        Self {
            message_type,
            total: info.total,
            aggregate_crc: info.aggregate_crc,
            chunks: HashMap::new(),
            bytes: 0,
            last_activity: Instant::now(),
        }
    }
}

/// Reassembles chunked logical messages, keyed by request id.
///
/// Chunks may arrive in any order; placement is by index. Any inconsistency
/// (duplicate index, index past the declared total, a descriptor that
/// disagrees with earlier chunks, a set declaring or accumulating more than
/// the size cap, an aggregate checksum that does not match the reassembled
/// bytes) drops the whole pending set for that request id. Sets idle past
/// the inactivity window are swept on every call.
#[derive(Debug)]
pub struct ChunkAssembler {
    max_age: Duration,
    max_total_size: usize,
    pending: HashMap<String, PendingSet>,
}

impl ChunkAssembler {
    /// Creates an assembler that evicts sets idle longer than `max_age` and
    /// rejects sets growing past `max_total_size` bytes.
    #[must_use]
    pub fn new(max_age: Duration, max_total_size: usize) -> Self {
        Self {
            max_age,
            max_total_size,
            pending: HashMap::new(),
        }
    }

    /// Feeds one chunk frame. Returns the logical message once its set is
    /// complete and verified.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on any chunk inconsistency; the pending set
    /// for the frame's request id is dropped before returning.
    pub fn accept(&mut self, frame: AnpxMessage) -> Result<Option<AnpxMessage>, CodecError> {
        self.evict_stale(self.max_age);

        let request_id = frame
            .request_id()
            .ok_or(CodecError::MissingField {
                tag: TlvTag::RequestId.as_byte(),
            })?
            .to_string();
        match self.accept_inner(&request_id, &frame) {
            Ok(done) => Ok(done),
            Err(e) => {
                self.pending.remove(&request_id);
                Err(e)
            }
        }
    }

    fn accept_inner(
        &mut self,
        request_id: &str,
        frame: &AnpxMessage,
    ) -> Result<Option<AnpxMessage>, CodecError> {
        let info_bytes = frame.field(TlvTag::ChunkInfo).ok_or(CodecError::MissingField {
            tag: TlvTag::ChunkInfo.as_byte(),
        })?;
        let info = ChunkInfo::parse(info_bytes)?;
        let data = frame.field(TlvTag::ChunkData).ok_or(CodecError::MissingField {
            tag: TlvTag::ChunkData.as_byte(),
        })?;
        if info.index >= info.total {
            return Err(CodecError::ChunkIndexOutOfRange {
                index: info.index,
                total: info.total,
            });
        }
        // Every chunk carries at least one byte, so a set with more chunks
        // than the cap can never verify. Reject it on the first frame.
        if info.total as usize > self.max_total_size {
            return Err(CodecError::ChunkSetTooLarge {
                actual: info.total as usize,
                max: self.max_total_size,
            });
        }

        let set = self
            .pending
            .entry(request_id.to_string())
            .or_insert_with(|| PendingSet::new(frame.message_type, info));
        if set.total != info.total
            || set.aggregate_crc != info.aggregate_crc
            || set.message_type != frame.message_type
        {
            return Err(CodecError::ChunkSetMismatch);
        }
        if set.chunks.contains_key(&info.index) {
            return Err(CodecError::DuplicateChunk { index: info.index });
        }
        set.bytes += data.len();
        if set.bytes > self.max_total_size {
            return Err(CodecError::ChunkSetTooLarge {
                actual: set.bytes,
                max: self.max_total_size,
            });
        }
        set.chunks.insert(info.index, data.to_vec());
        set.last_activity = Instant::now();

        if set.chunks.len() < set.total as usize {
            return Ok(None);
        }
        let mut set = self
            .pending
            .remove(request_id)
            .ok_or(CodecError::ChunkSetMismatch)?;
        let mut body = Vec::with_capacity(set.bytes);
        for index in 0..set.total {
            let slice = set
                .chunks
                .remove(&index)
                .ok_or(CodecError::ChunkSetMismatch)?;
            body.extend_from_slice(&slice);
        }
        let actual = crc32fast::hash(&body);
        if actual != set.aggregate_crc {
            return Err(CodecError::AggregateCrcMismatch {
                expected: set.aggregate_crc,
                actual,
            });
        }
        let fields = parse_fields(&body)?;
        Ok(Some(AnpxMessage::from_fields(set.message_type, fields)))
    }

    /// Drops pending sets whose last activity is older than `max_age`.
    pub fn evict_stale(&mut self, max_age: Duration) {
        self.pending.retain(|request_id, set| {
            let keep = set.last_activity.elapsed() < max_age;
            if !keep {
                debug!(
                    request_id = %request_id,
                    received = set.chunks.len(),
                    total = set.total,
                    "evicting stale chunk set"
                );
            }
            keep
        });
    }

    /// Number of partially received chunk sets currently held.
    #[must_use]
    pub fn pending_sets(&self) -> usize {
        self.pending.len()
    }
}
