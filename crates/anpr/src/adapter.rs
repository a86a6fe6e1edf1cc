//! Bridges decoded ANPX requests to a local HTTP-shaped handler.
//!
//! The adapter owns the error conversion contract: whatever happens inside
//! the handler, every dispatched request produces exactly one response
//! message. Metadata problems become a 400, handler errors and panics become
//! a synthetic 500.

use anpx::{AnpxMessage, HttpMeta, MessageType, RespMeta, TlvTag};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// A decoded inbound request as seen by a handler.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Correlation id from the REQUEST_ID field.
    pub request_id: String,
    /// Method, path, query, headers.
    pub meta: HttpMeta,
    /// Raw request body, empty when absent.
    pub body: Vec<u8>,
}

/// What a handler returns; the adapter turns it into RESP_META plus body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// Creates an empty response with the given status.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header, returning `self` for chaining.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Sets the body, returning `self` for chaining.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds a JSON response with `content-type` set.
    ///
    /// # Errors
    ///
    /// Propagates the `serde_json` error if `value` cannot be serialized.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_vec(value)?))
    }
}

/// An HTTP-shaped request handler.
///
/// The router spawns one task per request, so implementations must tolerate
/// concurrent calls.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    /// Handles one request. An `Err` becomes a synthetic 500.
    async fn handle(&self, request: GatewayRequest) -> anyhow::Result<GatewayResponse>;
}

/// Converts decoded requests into handler calls and handler outcomes into
/// response messages.
pub struct RequestAdapter {
    handler: Arc<dyn HttpHandler>,
}

impl RequestAdapter {
    /// Wraps a handler.
    #[must_use]
    pub fn new(handler: Arc<dyn HttpHandler>) -> Self {
        Self { handler }
    }

    /// Runs the handler for one decoded request.
    ///
    /// Never fails; the returned message is always an HTTP response carrying
    /// the given request id.
    pub async fn dispatch(&self, request_id: &str, message: &AnpxMessage) -> AnpxMessage {
        let meta = match message.http_meta() {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                warn!(request_id, "request without HTTP metadata");
                return error_response(request_id, 400, "Bad Request: missing HTTP metadata");
            }
            Err(e) => {
                warn!(request_id, error = %e, "request with unreadable HTTP metadata");
                return error_response(request_id, 400, "Bad Request: missing HTTP metadata");
            }
        };

        let request = GatewayRequest {
            request_id: request_id.to_string(),
            meta,
            body: message.body().to_vec(),
        };
        let handler = Arc::clone(&self.handler);
        // Inner spawn so a panicking handler surfaces as a join error here
        // instead of unwinding through the router.
        let outcome = tokio::spawn(async move { handler.handle(request).await }).await;

        match outcome {
            Ok(Ok(response)) => build_response(request_id, response),
            Ok(Err(e)) => {
                error!(request_id, error = %e, "handler failed");
                error_response(request_id, 500, "Internal Server Error")
            }
            Err(e) => {
                error!(request_id, error = %e, "handler panicked");
                error_response(request_id, 500, "Internal Server Error")
            }
        }
    }
}

fn build_response(request_id: &str, response: GatewayResponse) -> AnpxMessage {
    let mut meta = RespMeta::new(response.status);
    meta.headers = response.headers;
    if !response.body.is_empty()
        && !meta
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-length"))
    {
        meta.headers
            .insert("content-length".to_string(), response.body.len().to_string());
    }
    encode_response(request_id, &meta, &response.body)
}

fn error_response(request_id: &str, status: u16, detail: &str) -> AnpxMessage {
    build_response(
        request_id,
        GatewayResponse::new(status)
            .with_header("content-type", "text/plain")
            .with_body(detail),
    )
}

fn encode_response(request_id: &str, meta: &RespMeta, body: &[u8]) -> AnpxMessage {
    match AnpxMessage::response(request_id, meta, body) {
        Ok(message) => message,
        Err(e) => {
            error!(request_id, error = %e, "failed to encode response metadata");
            let mut message = AnpxMessage::new(MessageType::HttpResponse);
            message.add_field(TlvTag::RequestId, request_id.as_bytes());
            message
        }
    }
}

/// Minimal built-in service: answers `GET /anp/status`, 404 elsewhere.
#[derive(Debug, Clone)]
pub struct StatusHandler {
    service: String,
}

impl StatusHandler {
    /// Creates a status handler reporting the given service name.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl HttpHandler for StatusHandler {
    async fn handle(&self, request: GatewayRequest) -> anyhow::Result<GatewayResponse> {
        if request.meta.method.eq_ignore_ascii_case("GET") && request.meta.path == "/anp/status" {
            Ok(GatewayResponse::json(
                200,
                &serde_json::json!({"status": "ok", "service": self.service}),
            )?)
        } else {
            Ok(GatewayResponse::json(
                404,
                &serde_json::json!({"error": "not found", "path": request.meta.path}),
            )?)
        }
    }
}
