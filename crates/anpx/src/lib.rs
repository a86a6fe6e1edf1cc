//! ANPX wire codec.
//!
//! This crate provides:
//! - Fixed-header frame serialization and parsing ([`header`], [`message`])
//! - Chunk splitting for oversized messages ([`encoder`])
//! - Incremental decoding and chunk reassembly ([`decoder`])
//! - HTTP metadata payloads carried in TLV fields ([`meta`])
//!
//! The codec is transport-agnostic and fully synchronous: callers feed bytes
//! in and get [`AnpxMessage`] values out. Async I/O lives above this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod header;
pub mod message;
pub mod meta;

pub use decoder::{AnpxDecoder, ChunkAssembler, DecodeProgress};
pub use encoder::AnpxEncoder;
pub use error::CodecError;
pub use header::{AnpxHeader, FLAG_CHUNKED, HEADER_LEN, MessageType};
pub use message::{AnpxMessage, ChunkInfo, FrameDecode, TlvField, TlvTag};
pub use meta::{HttpMeta, RespMeta};
