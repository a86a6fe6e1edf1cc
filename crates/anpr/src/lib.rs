//! ANP receiver daemon — persistent gateway connection serving local handlers.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP handler trait and request dispatch.
pub mod adapter;
/// Exponential backoff with jitter for reconnection.
pub mod backoff;
/// CLI parsing and TOML configuration.
pub mod config;
/// JSON control-plane messages exchanged with the gateway.
pub mod control;
/// WebSocket gateway connection manager.
pub mod gateway;
/// Frame routing between the wire and request handlers.
pub mod router;
/// Receiver façade: one managed connection per identity.
pub mod service;
