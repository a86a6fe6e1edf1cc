//! DID-WBA authentication for the ANP receiver stack.
//!
//! This crate provides:
//! - Local identity management: DID documents plus Ed25519 signing keys
//!   ([`identity`], [`document`], [`keys`])
//! - Authorization header construction and parsing ([`header`])
//! - The server-side verification pipeline with injected DID resolution and
//!   nonce replay protection ([`verify`], [`resolver`], [`nonce`])
//! - Stateless EdDSA bearer tokens for post-handshake requests ([`token`])
//!
//! The client side builds a header with [`header::build_auth_header`]; the
//! server side runs [`verify::DidVerifier::verify`] and, on success, may hand
//! back a token from [`token::TokenAuthority`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod document;
pub mod error;
pub mod header;
pub mod identity;
pub mod keys;
pub mod nonce;
pub mod resolver;
pub mod token;
pub mod verify;

pub use document::{DidDocument, DidParts, VerificationMethod, parse_did};
pub use error::AuthError;
pub use header::{AuthParts, build_auth_header, parse_auth_header};
pub use identity::Identity;
pub use nonce::{MemoryNonceStore, NonceStore};
pub use resolver::{DidResolver, FileResolver, HttpResolver, ResolverChain};
pub use token::TokenAuthority;
pub use verify::{DidAuthResult, DidVerifier, REJECTION_MESSAGE};
