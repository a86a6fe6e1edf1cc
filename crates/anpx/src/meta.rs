//! Structured metadata carried in HTTP_META / RESP_META fields.
//!
//! Both records travel as compact JSON inside their TLV values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request metadata: the HTTP-shaped envelope of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMeta {
    /// HTTP method, uppercase.
    pub method: String,
    /// Request path with a leading `/`.
    pub path: String,
    /// Query parameters, already split out of the path.
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    /// Request headers, lowercase names.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl HttpMeta {
    /// Creates metadata for a method and path with no query or headers.
    #[must_use]
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            query_params: HashMap::new(),
            headers: HashMap::new(),
        }
    }
}

/// Response metadata: status line plus headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespMeta {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase matching the status code.
    pub reason: String,
    /// Response headers, lowercase names.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RespMeta {
    /// Creates response metadata with the canonical reason phrase.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: HashMap::new(),
        }
    }

    /// Adds a header, returning `self` for chaining.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// Canonical reason phrase for a status code; `"Unknown"` for codes outside
/// the table.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
