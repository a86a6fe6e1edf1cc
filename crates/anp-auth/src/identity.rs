//! Local signing identity: a DID document plus its Ed25519 signing key.
//!
//! On-disk layout for one identity directory:
//!
//! ```text
//! <dir>/did.json    DID document (world-readable)
//! <dir>/key-1.key   raw 32-byte Ed25519 seed, mode 0600
//! ```

use crate::document::{DidDocument, VerificationMethod};
use crate::error::AuthError;
use crate::keys;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

const KEY_FILE_PERMS: u32 = 0o600;

/// Document file name inside an identity directory.
pub const DOCUMENT_FILE: &str = "did.json";

/// Key file name inside an identity directory.
pub const KEY_FILE: &str = "key-1.key";

const METHOD_FRAGMENT: &str = "key-1";
const METHOD_TYPE: &str = "Ed25519VerificationKey2020";

/// A DID, its document, and the signing key that answers for it.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The DID this identity signs as.
    pub did: String,
    /// Full verification method id to cite in auth headers.
    pub verification_method: String,
    /// The published document.
    pub document: DidDocument,
    signing_key: SigningKey,
}

impl Identity {
    /// Loads an identity from a document file and a key file.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is unreadable, the key file has lax
    /// permissions or the wrong length, or the document lists no usable
    /// verification method.
    pub fn load(document_path: &Path, key_path: &Path) -> Result<Self, AuthError> {
        let document: DidDocument = serde_json::from_slice(&fs::read(document_path)?)?;
        let signing_key = load_signing_key(key_path)?;
        let verification_method = document
            .primary_method()
            .ok_or_else(|| AuthError::UnknownVerificationMethod(document.id.clone()))?
            .to_string();
        Ok(Self {
            did: document.id.clone(),
            verification_method,
            document,
            signing_key,
        })
    }

    /// Generates a fresh identity and writes both files into `dir`.
    ///
    /// The DID is `did:wba:<host>[%3A<port>]:wba:user:<user_id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or files cannot be written.
    pub fn generate(
        dir: &Path,
        hostname: &str,
        port: Option<u16>,
        user_id: &str,
    ) -> Result<Self, AuthError> {
        let did = match port {
            Some(port) => format!("did:wba:{hostname}%3A{port}:wba:user:{user_id}"),
            None => format!("did:wba:{hostname}:wba:user:{user_id}"),
        };
        let signing_key = SigningKey::generate(&mut OsRng);
        let method_id = format!("{did}#{METHOD_FRAGMENT}");
        let document = DidDocument {
            id: did.clone(),
            verification_method: vec![VerificationMethod {
                id: method_id.clone(),
                method_type: METHOD_TYPE.to_string(),
                controller: did.clone(),
                public_key_multibase: keys::encode_verifying_key(&signing_key.verifying_key()),
            }],
            authentication: vec![method_id.clone()],
        };

        fs::create_dir_all(dir)?;
        write_signing_key(&dir.join(KEY_FILE), &signing_key)?;
        fs::write(
            dir.join(DOCUMENT_FILE),
            serde_json::to_vec_pretty(&document)?,
        )?;

        Ok(Self {
            did,
            verification_method: method_id,
            document,
            signing_key,
        })
    }

    /// Loads the identity in `dir` if its document exists, otherwise
    /// generates one there.
    ///
    /// # Errors
    ///
    /// Propagates [`Identity::load`] and [`Identity::generate`] failures.
    pub fn load_or_generate(
        dir: &Path,
        hostname: &str,
        port: Option<u16>,
        user_id: &str,
    ) -> Result<Self, AuthError> {
        let document_path = dir.join(DOCUMENT_FILE);
        if document_path.exists() {
            Self::load(&document_path, &dir.join(KEY_FILE))
        } else {
            Self::generate(dir, hostname, port, user_id)
        }
    }

    /// The private signing key.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// Reads a raw 32-byte Ed25519 seed, refusing key files readable by group
/// or other.
///
/// # Errors
///
/// Returns [`AuthError::BadKey`] on lax permissions or wrong length, and
/// [`AuthError::Io`] on read failure.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, AuthError> {
    let permissions = fs::metadata(path)?.permissions().mode();
    if permissions & 0o077 != 0 {
        return Err(AuthError::BadKey(format!(
            "key file {} has overly permissive permissions ({:o}), must be 0600",
            path.display(),
            permissions & 0o777
        )));
    }

    let seed = fs::read(path)?;
    let len = seed.len();
    let raw: [u8; 32] = seed
        .try_into()
        .map_err(|_: Vec<u8>| AuthError::BadKey(format!("key file must be 32 bytes, got {len}")))?;
    Ok(SigningKey::from_bytes(&raw))
}

fn write_signing_key(path: &Path, key: &SigningKey) -> Result<(), AuthError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(KEY_FILE_PERMS)
        .open(path)?;
    file.write_all(&key.to_bytes())?;
    Ok(())
}
