//! DID syntax and DID document model.
//!
//! A web-based agent DID has the shape
//! `did:wba:<host>[%3A<port>]:<path..>:<user_id>` with at least five
//! colon-separated segments. `%3A` encodes the `:` between host and port so
//! the port does not read as a segment separator.

use crate::error::AuthError;
use crate::keys;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// The components of a parsed `did:wba` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidParts {
    /// Host (and port, if any), with `%3A` decoded back to `:`.
    pub host: String,
    /// Path segments between the host and the user id.
    pub path_segments: Vec<String>,
    /// The final segment, identifying the user.
    pub user_id: String,
}

/// Parses a `did:wba` identifier into its components.
///
/// # Errors
///
/// Returns [`AuthError::InvalidDid`] if the method is not `wba`, fewer than
/// five segments are present, or the host or user id segment is empty.
pub fn parse_did(did: &str) -> Result<DidParts, AuthError> {
    let parts: Vec<&str> = did.split(':').collect();
    if parts.len() < 5 || parts[0] != "did" || parts[1] != "wba" {
        return Err(AuthError::InvalidDid(did.to_string()));
    }
    let host = parts[2].replace("%3A", ":").replace("%3a", ":");
    let user_id = parts[parts.len() - 1].to_string();
    if host.is_empty() || user_id.is_empty() {
        return Err(AuthError::InvalidDid(did.to_string()));
    }
    let path_segments = parts[3..parts.len() - 1]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    Ok(DidParts {
        host,
        path_segments,
        user_id,
    })
}

/// One verification method entry in a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// Method id, `<did>#<fragment>`.
    pub id: String,
    /// Key type, `Ed25519VerificationKey2020` for keys this crate produces.
    #[serde(rename = "type")]
    pub method_type: String,
    /// The DID controlling this key.
    pub controller: String,
    /// Multibase-encoded verifying key.
    pub public_key_multibase: String,
}

/// A DID document: the identifier plus its published verification methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    /// The DID this document describes.
    pub id: String,
    /// Published verification methods.
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
    /// Method ids usable for authentication.
    #[serde(default)]
    pub authentication: Vec<String>,
}

impl DidDocument {
    /// Looks up a verification method by full id or by fragment and decodes
    /// its verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownVerificationMethod`] if no method matches,
    /// or [`AuthError::BadKey`] if the published key does not decode.
    pub fn verifying_key(&self, method_id: &str) -> Result<VerifyingKey, AuthError> {
        let fragment = method_id.rsplit('#').next().unwrap_or(method_id);
        let method = self
            .verification_method
            .iter()
            .find(|m| m.id == method_id || m.id.rsplit('#').next() == Some(fragment))
            .ok_or_else(|| AuthError::UnknownVerificationMethod(method_id.to_string()))?;
        keys::decode_verifying_key(&method.public_key_multibase)
    }

    /// The method id to sign with: the first `authentication` reference, or
    /// the first verification method when none is listed.
    #[must_use]
    pub fn primary_method(&self) -> Option<&str> {
        self.authentication
            .first()
            .map(String::as_str)
            .or_else(|| self.verification_method.first().map(|m| m.id.as_str()))
    }
}
