//! Signed bearer tokens.
//!
//! After a successful DID-WBA verification the server can hand the client a
//! stateless EdDSA JWT so later requests skip the full pipeline. Claims are
//! `{sub: <did>, iat, exp}` and the subject must be a `did:wba` identifier.

use crate::error::AuthError;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Clock-skew tolerance for `exp` and `iat`, in seconds.
const LEEWAY_SECS: u64 = 5;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// Issues and verifies EdDSA bearer tokens.
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenAuthority {
    /// Loads key material from PEM files (PKCS#8 private, SPKI public).
    ///
    /// # Errors
    ///
    /// Returns an error if either file is unreadable or not a valid Ed25519
    /// PEM.
    pub fn from_pem_files(
        private_path: &Path,
        public_path: &Path,
        ttl: Duration,
    ) -> Result<Self, AuthError> {
        let private_pem = std::fs::read(private_path)?;
        let public_pem = std::fs::read(public_path)?;
        Ok(Self {
            encoding: EncodingKey::from_ed_pem(&private_pem)
                .map_err(|e| AuthError::BadKey(format!("private key PEM: {e}")))?,
            decoding: DecodingKey::from_ed_pem(&public_pem)
                .map_err(|e| AuthError::BadKey(format!("public key PEM: {e}")))?,
            ttl,
        })
    }

    /// Derives both token keys from an in-memory signing key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadKey`] if PEM export fails.
    pub fn from_signing_key(key: &SigningKey, ttl: Duration) -> Result<Self, AuthError> {
        let private_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::BadKey(format!("private key export: {e}")))?;
        let public_pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::BadKey(format!("public key export: {e}")))?;
        Ok(Self {
            encoding: EncodingKey::from_ed_pem(private_pem.as_bytes())
                .map_err(|e| AuthError::BadKey(format!("private key PEM: {e}")))?,
            decoding: DecodingKey::from_ed_pem(public_pem.as_bytes())
                .map_err(|e| AuthError::BadKey(format!("public key PEM: {e}")))?,
            ttl,
        })
    }

    /// Issues a token for `did`, valid from now for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadToken`] if signing fails.
    pub fn issue(&self, did: &str) -> Result<String, AuthError> {
        self.issue_at(did, unix_now())
    }

    fn issue_at(&self, did: &str, now: u64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: did.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding)
            .map_err(|e| AuthError::BadToken(e.to_string()))
    }

    /// Verifies a token (with or without a `Bearer ` prefix) and returns its
    /// subject DID.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadToken`] if the signature or expiry fails, the
    /// token was issued beyond the skew tolerance in the future, or the
    /// subject is not a `did:wba` identifier.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = LEEWAY_SECS;

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::BadToken(e.to_string()))?;
        let claims = data.claims;
        if !claims.sub.starts_with("did:wba:") {
            return Err(AuthError::BadToken(
                "subject is not a did:wba identifier".to_string(),
            ));
        }
        if claims.iat > unix_now() + LEEWAY_SECS {
            return Err(AuthError::BadToken("token issued in the future".to_string()));
        }
        Ok(claims.sub)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
