//! Minimal receiver wired to an echo handler.
//!
//! Generates a demo identity under `did_keys/` on first run, then connects
//! to the gateway and echoes every HTTP request back to the caller:
//!
//! ```sh
//! cargo run --example echo -- ws://localhost:8789
//! ```

use anp_auth::Identity;
use anp_auth::identity::{DOCUMENT_FILE, KEY_FILE};
use anpr::adapter::{GatewayRequest, GatewayResponse, HttpHandler};
use anpr::config::{IdentityConfig, ReceiverConfig};
use anpr::service::Receiver;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

struct EchoHandler;

#[async_trait]
impl HttpHandler for EchoHandler {
    async fn handle(&self, request: GatewayRequest) -> anyhow::Result<GatewayResponse> {
        let mut body = format!("{} {}\n", request.meta.method, request.meta.path).into_bytes();
        body.extend_from_slice(&request.body);
        Ok(GatewayResponse::new(200)
            .with_header("content-type", "text/plain")
            .with_body(body))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let gateway = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:8789".to_string());

    let dir = PathBuf::from("did_keys");
    let identity = Identity::load_or_generate(&dir, "localhost", None, "echo-demo")?;
    info!(did = %identity.did, "using identity");

    let config = ReceiverConfig {
        gateway_url: gateway,
        advertised_services: vec!["echo".to_string()],
        identity: vec![IdentityConfig {
            document: dir.join(DOCUMENT_FILE),
            key: dir.join(KEY_FILE),
        }],
        ..ReceiverConfig::default()
    };

    let receiver = Receiver::start(config, Arc::new(EchoHandler)).await?;
    info!("echo receiver running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    receiver.stop().await;
    Ok(())
}
