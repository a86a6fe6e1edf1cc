//! Authentication error type.

use thiserror::Error;

/// Errors produced while building or verifying DID-WBA credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The Authorization header does not follow the DIDWba structure.
    #[error("malformed authorization header: {0}")]
    MalformedHeader(String),
    /// The DID does not follow `did:wba:<host>:<path..>:<user_id>` syntax.
    #[error("invalid DID: {0}")]
    InvalidDid(String),
    /// The timestamp is unparseable or outside the accepted window.
    #[error("timestamp rejected: {0}")]
    BadTimestamp(String),
    /// The nonce was already used within the replay window.
    #[error("nonce already used: {0}")]
    NonceReused(String),
    /// No resolver produced a DID document.
    #[error("could not resolve DID document for {0}")]
    UnresolvableDid(String),
    /// The DID document does not carry the referenced verification method.
    #[error("unknown verification method: {0}")]
    UnknownVerificationMethod(String),
    /// The signature does not verify against the canonical payload.
    #[error("signature verification failed")]
    BadSignature,
    /// Key material could not be decoded or fails basic validity checks.
    #[error("key material rejected: {0}")]
    BadKey(String),
    /// A signed token failed issuance or verification.
    #[error("token rejected: {0}")]
    BadToken(String),
    /// Identity or document file I/O failed.
    #[error("identity file error: {0}")]
    Io(#[from] std::io::Error),
    /// A DID document or payload could not be (de)serialized.
    #[error("identity document error: {0}")]
    Json(#[from] serde_json::Error),
}
