//! DID document resolution.
//!
//! Resolution is a chain of injected resolvers tried in order: the first
//! document wins, a miss moves on, and only structural problems (an invalid
//! DID) abort the chain. The stock chain is filesystem first, HTTP second,
//! mirroring a deployment where local identities are provisioned on disk and
//! foreign ones are fetched from their home host.

use crate::document::{parse_did, DidDocument};
use crate::error::AuthError;
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves a DID to its document.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Returns the document, `None` when this resolver has no answer.
    ///
    /// # Errors
    ///
    /// Returns an error only for structural failures such as an invalid DID;
    /// a plain miss is `Ok(None)`.
    async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, AuthError>;
}

/// Filesystem resolver. Layout: `<root>/user_<id>/did.json`.
pub struct FileResolver {
    root: PathBuf,
}

impl FileResolver {
    /// Creates a resolver rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DidResolver for FileResolver {
    async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, AuthError> {
        let parts = parse_did(did)?;
        let path = self
            .root
            .join(format!("user_{}", parts.user_id))
            .join("did.json");
        if !path.exists() {
            debug!(did = %did, path = %path.display(), "no local DID document");
            return Ok(None);
        }
        let document: DidDocument = serde_json::from_slice(&std::fs::read(&path)?)?;
        Ok(Some(document))
    }
}

/// HTTP resolver: fetches `/wba/user/<id>/did.json` from the DID's host.
///
/// Uses `https` unless plain-text fetches are explicitly allowed (local
/// development against `localhost` gateways).
pub struct HttpResolver {
    client: Client,
    allow_http: bool,
}

impl HttpResolver {
    /// Creates an `https`-only resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheme(false)
    }

    /// Creates a resolver, optionally allowing plain `http` fetches.
    #[must_use]
    pub fn with_scheme(allow_http: bool) -> Self {
        Self {
            client: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            allow_http,
        }
    }
}

impl Default for HttpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DidResolver for HttpResolver {
    async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, AuthError> {
        let parts = parse_did(did)?;
        let scheme = if self.allow_http { "http" } else { "https" };
        let url = format!(
            "{scheme}://{}/wba/user/{}/did.json",
            parts.host, parts.user_id
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "DID document fetch failed");
                return Ok(None);
            }
        };
        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "DID document fetch returned non-success");
            return Ok(None);
        }
        match response.json::<DidDocument>().await {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                warn!(url = %url, error = %e, "fetched DID document is not valid JSON");
                Ok(None)
            }
        }
    }
}

/// Tries each resolver in order; the first document wins.
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn DidResolver>>,
}

impl ResolverChain {
    /// Creates a chain from the given resolvers.
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn DidResolver>>) -> Self {
        Self { resolvers }
    }

    /// The stock chain: filesystem under `root`, then HTTP.
    #[must_use]
    pub fn standard(root: impl Into<PathBuf>, allow_http: bool) -> Self {
        Self::new(vec![
            Arc::new(FileResolver::new(root)),
            Arc::new(HttpResolver::with_scheme(allow_http)),
        ])
    }
}

#[async_trait]
impl DidResolver for ResolverChain {
    async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, AuthError> {
        for resolver in &self.resolvers {
            if let Some(document) = resolver.resolve(did).await? {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }
}
