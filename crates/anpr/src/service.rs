//! Receiver façade: one gateway connection per configured identity.

use crate::adapter::HttpHandler;
use crate::config::ReceiverConfig;
use crate::gateway::{ConnState, GatewayConnection};
use anp_auth::Identity;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// A running receiver: every configured identity holds its own managed
/// connection to the gateway, all serving the same handler.
#[derive(Debug)]
pub struct Receiver {
    connections: Vec<(String, GatewayConnection)>,
}

impl Receiver {
    /// Loads every configured identity and connects each one.
    ///
    /// Startup is all-or-nothing: if any identity fails to load or its first
    /// connection attempt fails, connections already established are stopped
    /// and the error is returned.
    ///
    /// # Errors
    ///
    /// Fails when no identities are configured, an identity cannot be loaded,
    /// or a first connection attempt is refused.
    pub async fn start(
        config: ReceiverConfig,
        handler: Arc<dyn HttpHandler>,
    ) -> anyhow::Result<Self> {
        if config.identity.is_empty() {
            anyhow::bail!("no identities configured");
        }

        let config = Arc::new(config);
        let mut connections: Vec<(String, GatewayConnection)> = Vec::new();
        for entry in &config.identity {
            let identity = match Identity::load(&entry.document, &entry.key)
                .with_context(|| format!("loading identity from {}", entry.document.display()))
            {
                Ok(identity) => Arc::new(identity),
                Err(e) => {
                    stop_all(connections).await;
                    return Err(e);
                }
            };
            let did = identity.did.clone();
            match GatewayConnection::connect(
                Arc::clone(&config),
                identity,
                Arc::clone(&handler),
            )
            .await
            {
                Ok(connection) => connections.push((did, connection)),
                Err(e) => {
                    stop_all(connections).await;
                    return Err(e.context(format!("connecting identity {did}")));
                }
            }
        }

        info!(connections = connections.len(), "receiver started");
        Ok(Self { connections })
    }

    /// State watchers for every connection, keyed by DID.
    #[must_use]
    pub fn states(&self) -> Vec<(String, watch::Receiver<ConnState>)> {
        self.connections
            .iter()
            .map(|(did, connection)| (did.clone(), connection.state()))
            .collect()
    }

    /// Stops every connection, waiting up to the per-connection stop timeout.
    pub async fn stop(self) {
        stop_all(self.connections).await;
        info!("receiver stopped");
    }
}

async fn stop_all(connections: Vec<(String, GatewayConnection)>) {
    for (did, connection) in connections {
        debug!(%did, "stopping gateway connection");
        connection.stop().await;
    }
}
