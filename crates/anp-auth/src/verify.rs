//! The DID-WBA verification pipeline.
//!
//! Order matters: timestamp window, then nonce replay, then document
//! resolution, then signature. Failing an early stage must not consume the
//! nonce or touch the network for a request that was never going to pass.

use crate::error::AuthError;
use crate::header::{canonical_payload, parse_auth_header};
use crate::keys;
use crate::nonce::NonceStore;
use crate::resolver::DidResolver;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The one message shown to unauthenticated callers, regardless of which
/// stage rejected them.
pub const REJECTION_MESSAGE: &str = "authentication failed";

/// Outcome of a verification attempt.
#[derive(Debug)]
pub struct DidAuthResult {
    /// Whether the credential verified.
    pub success: bool,
    /// The verified DID, on success.
    pub did: Option<String>,
    /// The specific failure, for logs only.
    pub error: Option<AuthError>,
}

impl DidAuthResult {
    fn ok(did: String) -> Self {
        Self {
            success: true,
            did: Some(did),
            error: None,
        }
    }

    fn rejected(error: AuthError) -> Self {
        debug!(error = %error, "DID-WBA verification rejected");
        Self {
            success: false,
            did: None,
            error: Some(error),
        }
    }

    /// The uniform outward-facing message, `None` on success. The specific
    /// reason stays in [`DidAuthResult::error`] for internal logging.
    #[must_use]
    pub fn public_message(&self) -> Option<&'static str> {
        if self.success {
            None
        } else {
            Some(REJECTION_MESSAGE)
        }
    }
}

/// Verifies DID-WBA Authorization headers against an injected resolver and
/// nonce store.
pub struct DidVerifier {
    resolver: Arc<dyn DidResolver>,
    nonces: Arc<dyn NonceStore>,
    timestamp_window: Duration,
}

impl DidVerifier {
    /// Creates a verifier. `timestamp_window` bounds the absolute skew
    /// between the header timestamp and this host's clock.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn DidResolver>,
        nonces: Arc<dyn NonceStore>,
        timestamp_window: Duration,
    ) -> Self {
        Self {
            resolver,
            nonces,
            timestamp_window,
        }
    }

    /// Runs the full pipeline for a header presented to `domain`.
    pub async fn verify(&self, authorization: &str, domain: &str) -> DidAuthResult {
        let parts = match parse_auth_header(authorization) {
            Ok(parts) => parts,
            Err(e) => return DidAuthResult::rejected(e),
        };

        if let Err(e) = check_timestamp(&parts.timestamp, self.timestamp_window) {
            return DidAuthResult::rejected(e);
        }

        if !self.nonces.accept(&parts.nonce) {
            return DidAuthResult::rejected(AuthError::NonceReused(parts.nonce));
        }

        let document = match self.resolver.resolve(&parts.did).await {
            Ok(Some(document)) => document,
            Ok(None) => return DidAuthResult::rejected(AuthError::UnresolvableDid(parts.did)),
            Err(e) => return DidAuthResult::rejected(e),
        };

        let key = match document.verifying_key(&parts.verification_method) {
            Ok(key) => key,
            Err(e) => return DidAuthResult::rejected(e),
        };

        let signature = match decode_signature(&parts.signature) {
            Ok(signature) => signature,
            Err(e) => return DidAuthResult::rejected(e),
        };
        let payload =
            match canonical_payload(&parts.did, &parts.nonce, domain, &parts.timestamp) {
                Ok(payload) => payload,
                Err(e) => return DidAuthResult::rejected(e),
            };
        if !keys::verify_payload(&key, &payload, &signature) {
            return DidAuthResult::rejected(AuthError::BadSignature);
        }

        DidAuthResult::ok(parts.did)
    }
}

fn check_timestamp(timestamp: &str, window: Duration) -> Result<(), AuthError> {
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| AuthError::BadTimestamp(format!("{timestamp}: {e}")))?;
    let skew = Utc::now()
        .signed_duration_since(parsed.with_timezone(&Utc))
        .num_seconds()
        .unsigned_abs();
    if skew > window.as_secs() {
        return Err(AuthError::BadTimestamp(format!(
            "{skew}s skew exceeds the {}s window",
            window.as_secs()
        )));
    }
    Ok(())
}

fn decode_signature(signature: &str) -> Result<[u8; 64], AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AuthError::BadSignature)?;
    bytes.try_into().map_err(|_| AuthError::BadSignature)
}
