//! Configuration loading and validation for the receiver.
//!
//! Settings are resolved in three layers: built-in defaults, an optional TOML
//! file, then `ANPR_`-prefixed environment variables (nested keys separated
//! by `__`, e.g. `ANPR_RECONNECT__MAX_ATTEMPTS=3`).
//!
//! ```toml
//! gateway_url = "wss://gateway.example.org/ws"
//! advertised_services = ["anp/status"]
//!
//! [reconnect]
//! initial_delay_ms = 5000
//! max_attempts = 10
//!
//! [[identity]]
//! document = "did_keys/user_alice/did.json"
//! key = "did_keys/user_alice/key-1.key"
//! ```

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Command-line interface for the `anpr` binary.
#[derive(Parser, Debug)]
#[command(name = "anpr", version, about = "ANP receiver: bridges an ANP gateway to local services")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Gateway WebSocket URL (overrides the configured `gateway_url`).
    #[arg(long, value_name = "URL")]
    pub gateway: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Top-level receiver configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ReceiverConfig {
    /// Gateway WebSocket URL (`ws://` or `wss://`).
    pub gateway_url: String,
    /// Seconds between keepalive pings.
    pub ping_interval_s: u64,
    /// Seconds to wait for a pong before declaring the connection dead.
    pub pong_timeout_s: u64,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
    /// Maximum TLV body size per frame before the encoder splits into chunks.
    pub chunk_size: usize,
    /// Upper bound on a single logical message, chunked or not.
    pub max_message_size: usize,
    /// Seconds an incomplete chunk set may sit idle before eviction.
    pub chunk_timeout_s: u64,
    /// Receive buffer cap in bytes; overflow clears the buffer.
    pub recv_buffer_limit: usize,
    /// Capacity of the bounded outbound frame channel.
    pub outbox_capacity: usize,
    /// Service path patterns advertised in capability responses.
    #[serde(default)]
    pub advertised_services: Vec<String>,
    /// Concurrent request cap advertised in capability responses.
    pub max_concurrent_requests: usize,
    /// DID-WBA authentication settings.
    pub auth: AuthConfig,
    /// Identities to connect with, one connection manager each.
    #[serde(default)]
    pub identity: Vec<IdentityConfig>,
}

/// Reconnection backoff settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// First reconnect delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Delay ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Consecutive failures tolerated before the connection goes FAILED.
    pub max_attempts: u32,
}

/// DID-WBA authentication settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Seconds a nonce stays recorded for replay detection.
    pub nonce_window_s: u64,
    /// Allowed clock skew for auth header timestamps, in seconds.
    pub timestamp_window_s: u64,
    /// Directory holding local DID documents (`user_<id>/did.json`).
    pub resolver_root: PathBuf,
    /// Permit plain-HTTP DID resolution (test setups only).
    #[serde(default)]
    pub allow_http_resolution: bool,
    /// PKCS#8 PEM private key for issuing JWTs.
    #[serde(default)]
    pub jwt_private_key: Option<PathBuf>,
    /// SPKI PEM public key for verifying JWTs.
    #[serde(default)]
    pub jwt_public_key: Option<PathBuf>,
}

/// One local identity: DID document plus signing key.
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Path to the DID document JSON.
    pub document: PathBuf,
    /// Path to the raw Ed25519 seed file.
    pub key: PathBuf,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://localhost:8789".to_string(),
            ping_interval_s: 10,
            pong_timeout_s: 10,
            reconnect: ReconnectConfig::default(),
            chunk_size: 64 * 1024,
            max_message_size: 10 * 1024 * 1024,
            chunk_timeout_s: 60,
            recv_buffer_limit: 1024 * 1024,
            outbox_capacity: 64,
            advertised_services: Vec::new(),
            max_concurrent_requests: 100,
            auth: AuthConfig::default(),
            identity: Vec::new(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            max_attempts: 10,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nonce_window_s: 300,
            timestamp_window_s: 300,
            resolver_root: PathBuf::from("did_keys"),
            allow_http_resolution: false,
            jwt_private_key: None,
            jwt_public_key: None,
        }
    }
}

impl ReceiverConfig {
    /// Checks the configuration for values that cannot work at runtime.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if !self.gateway_url.starts_with("ws://") && !self.gateway_url.starts_with("wss://") {
            return Err(format!(
                "gateway_url must use ws:// or wss:// scheme, got: {}",
                self.gateway_url
            ));
        }
        if self.ping_interval_s == 0 {
            return Err("ping_interval_s must be greater than 0".to_string());
        }
        if self.pong_timeout_s == 0 {
            return Err("pong_timeout_s must be greater than 0".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(
                "reconnect.max_delay_ms must be at least reconnect.initial_delay_ms".to_string(),
            );
        }
        if !self.reconnect.backoff_factor.is_finite() || self.reconnect.backoff_factor <= 0.0 {
            return Err("reconnect.backoff_factor must be a finite positive number".to_string());
        }
        if self.reconnect.max_attempts == 0 {
            return Err("reconnect.max_attempts must be greater than 0".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.chunk_size >= self.max_message_size {
            return Err("chunk_size must be smaller than max_message_size".to_string());
        }
        if self.chunk_timeout_s == 0 {
            return Err("chunk_timeout_s must be greater than 0".to_string());
        }
        if self.recv_buffer_limit == 0 {
            return Err("recv_buffer_limit must be greater than 0".to_string());
        }
        if self.outbox_capacity == 0 {
            return Err("outbox_capacity must be greater than 0".to_string());
        }
        if self.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be greater than 0".to_string());
        }
        if self.auth.nonce_window_s == 0 {
            return Err("auth.nonce_window_s must be greater than 0".to_string());
        }
        if self.auth.timestamp_window_s == 0 {
            return Err("auth.timestamp_window_s must be greater than 0".to_string());
        }
        for (i, identity) in self.identity.iter().enumerate() {
            if identity.document.as_os_str().is_empty() {
                return Err(format!("identity[{i}].document must not be empty"));
            }
            if identity.key.as_os_str().is_empty() {
                return Err(format!("identity[{i}].key must not be empty"));
            }
        }
        Ok(())
    }
}

/// Loads configuration from defaults, an optional TOML file, and the
/// environment.
///
/// # Errors
///
/// Fails when an explicitly given file is missing or unreadable, or when any
/// layer contains a value that does not deserialize.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ReceiverConfig> {
    let defaults = ReceiverConfig::default();

    let mut builder = config::Config::builder()
        .set_default("gateway_url", defaults.gateway_url.clone())?
        .set_default("ping_interval_s", defaults.ping_interval_s as i64)?
        .set_default("pong_timeout_s", defaults.pong_timeout_s as i64)?
        .set_default(
            "reconnect.initial_delay_ms",
            defaults.reconnect.initial_delay_ms as i64,
        )?
        .set_default(
            "reconnect.max_delay_ms",
            defaults.reconnect.max_delay_ms as i64,
        )?
        .set_default("reconnect.backoff_factor", defaults.reconnect.backoff_factor)?
        .set_default(
            "reconnect.max_attempts",
            i64::from(defaults.reconnect.max_attempts),
        )?
        .set_default("chunk_size", defaults.chunk_size as i64)?
        .set_default("max_message_size", defaults.max_message_size as i64)?
        .set_default("chunk_timeout_s", defaults.chunk_timeout_s as i64)?
        .set_default("recv_buffer_limit", defaults.recv_buffer_limit as i64)?
        .set_default("outbox_capacity", defaults.outbox_capacity as i64)?
        .set_default(
            "max_concurrent_requests",
            defaults.max_concurrent_requests as i64,
        )?
        .set_default("auth.nonce_window_s", defaults.auth.nonce_window_s as i64)?
        .set_default(
            "auth.timestamp_window_s",
            defaults.auth.timestamp_window_s as i64,
        )?
        .set_default(
            "auth.resolver_root",
            defaults.auth.resolver_root.to_string_lossy().into_owned(),
        )?
        .set_default("auth.allow_http_resolution", defaults.auth.allow_http_resolution)?;

    if let Some(config_path) = path {
        if !config_path.exists() {
            anyhow::bail!("config file not found: {}", config_path.display());
        }
        debug!(path = %config_path.display(), "loading config file");
        builder = builder.add_source(config::File::from(config_path));
    }

    builder = builder.add_source(config::Environment::with_prefix("ANPR").separator("__"));

    let config: ReceiverConfig = builder.build()?.try_deserialize()?;
    Ok(config)
}
