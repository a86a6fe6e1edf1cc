//! Ed25519 key encoding and signing helpers.
//!
//! DID documents publish verifying keys as multibase strings: a `z` prefix
//! followed by the base58 encoding of the raw 32-byte key. Signatures cover
//! the SHA-256 digest of the canonical payload, not the payload itself.

use crate::error::AuthError;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// Encodes a verifying key as a multibase (`z` + base58) string.
///
/// # Examples
///
/// ```
/// use ed25519_dalek::SigningKey;
///
/// let key = SigningKey::from_bytes(&[7u8; 32]);
/// let encoded = anp_auth::keys::encode_verifying_key(&key.verifying_key());
/// assert!(encoded.starts_with('z'));
/// ```
#[must_use]
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    format!("z{}", bs58::encode(key.as_bytes()).into_string())
}

/// Decodes a multibase string back to a verifying key.
///
/// # Errors
///
/// Returns [`AuthError::BadKey`] if the prefix is not `z`, the base58 is
/// invalid, the decoded key is not 32 bytes, or the point is not on the curve.
pub fn decode_verifying_key(multibase: &str) -> Result<VerifyingKey, AuthError> {
    let encoded = multibase
        .strip_prefix('z')
        .ok_or_else(|| AuthError::BadKey(format!("unsupported multibase prefix: {multibase}")))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| AuthError::BadKey(format!("invalid base58: {e}")))?;
    let len = bytes.len();
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_: Vec<u8>| AuthError::BadKey(format!("key must be 32 bytes, got {len}")))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| AuthError::BadKey(e.to_string()))
}

/// Signs `SHA-256(payload)` and returns the raw 64-byte signature.
#[must_use]
pub fn sign_payload(key: &SigningKey, payload: &[u8]) -> [u8; 64] {
    use ed25519_dalek::Signer;
    let digest = Sha256::digest(payload);
    key.sign(&digest).to_bytes()
}

/// Verifies a signature over `SHA-256(payload)`.
#[must_use]
pub fn verify_payload(key: &VerifyingKey, payload: &[u8], signature: &[u8; 64]) -> bool {
    use ed25519_dalek::Verifier;
    let digest = Sha256::digest(payload);
    let sig = Signature::from_bytes(signature);
    key.verify(&digest, &sig).is_ok()
}
