//! DID-WBA Authorization header construction and parsing.
//!
//! Header shape:
//!
//! ```text
//! DIDWba did="..", nonce="..", timestamp="..", verification_method="..", signature=".."
//! ```
//!
//! The signature covers the SHA-256 digest of a canonical JSON object
//! `{"did", "nonce", "service", "timestamp"}` (that exact field order),
//! where `service` is the domain the header is presented to. Signatures are
//! base64url without padding, timestamps ISO-8601 UTC at second precision,
//! nonces 32 hex characters used at most once.

use crate::error::AuthError;
use crate::identity::Identity;
use crate::keys;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

/// Authorization scheme name.
pub const SCHEME: &str = "DIDWba";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The five parts carried by a DID-WBA Authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthParts {
    /// The claimed DID.
    pub did: String,
    /// Single-use nonce.
    pub nonce: String,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    /// Verification method id (full or fragment).
    pub verification_method: String,
    /// base64url signature, no padding.
    pub signature: String,
}

/// Builds a header for `identity` scoped to `service`, with a fresh nonce
/// and the current time.
///
/// # Errors
///
/// Returns an error if the canonical payload cannot be serialized.
pub fn build_auth_header(identity: &Identity, service: &str) -> Result<String, AuthError> {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
    build_auth_header_at(identity, service, &nonce, &timestamp)
}

/// Builds a header with caller-supplied nonce and timestamp.
pub(crate) fn build_auth_header_at(
    identity: &Identity,
    service: &str,
    nonce: &str,
    timestamp: &str,
) -> Result<String, AuthError> {
    let payload = canonical_payload(&identity.did, nonce, service, timestamp)?;
    let signature = keys::sign_payload(identity.signing_key(), &payload);
    Ok(format!(
        "{SCHEME} did=\"{}\", nonce=\"{nonce}\", timestamp=\"{timestamp}\", \
         verification_method=\"{}\", signature=\"{}\"",
        identity.did,
        identity.verification_method,
        URL_SAFE_NO_PAD.encode(signature),
    ))
}

/// Serializes the canonical signing payload for the given parts.
///
/// # Errors
///
/// Returns [`AuthError::Json`] if serialization fails.
pub fn canonical_payload(
    did: &str,
    nonce: &str,
    service: &str,
    timestamp: &str,
) -> Result<Vec<u8>, AuthError> {
    #[derive(Serialize)]
    struct Payload<'a> {
        did: &'a str,
        nonce: &'a str,
        service: &'a str,
        timestamp: &'a str,
    }

    Ok(serde_json::to_vec(&Payload {
        did,
        nonce,
        service,
        timestamp,
    })?)
}

/// Parses a DID-WBA header into its parts.
///
/// Part order does not matter and unknown parts are ignored, but the scheme
/// and all five named parts must be present, each as `name="value"`.
///
/// # Errors
///
/// Returns [`AuthError::MalformedHeader`] on any structural violation.
pub fn parse_auth_header(header: &str) -> Result<AuthParts, AuthError> {
    let rest = header
        .trim()
        .strip_prefix(SCHEME)
        .ok_or_else(|| AuthError::MalformedHeader(format!("scheme is not {SCHEME}")))?;
    if !rest.starts_with(char::is_whitespace) {
        return Err(AuthError::MalformedHeader(format!(
            "scheme is not {SCHEME}"
        )));
    }

    let mut parts: HashMap<&str, &str> = HashMap::new();
    for pair in rest.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| AuthError::MalformedHeader(format!("part without '=': {pair}")))?;
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(|| AuthError::MalformedHeader(format!("unquoted value for {name}")))?;
        parts.insert(name.trim(), value);
    }

    let take = |name: &str| -> Result<String, AuthError> {
        parts
            .get(name)
            .map(|v| (*v).to_string())
            .ok_or_else(|| AuthError::MalformedHeader(format!("missing part: {name}")))
    };

    Ok(AuthParts {
        did: take("did")?,
        nonce: take("nonce")?,
        timestamp: take("timestamp")?,
        verification_method: take("verification_method")?,
        signature: take("signature")?,
    })
}
