//! Control-plane messages exchanged with the gateway over WebSocket text
//! frames.
//!
//! Binary frames carry ANPX; text frames carry small `type`-discriminated
//! JSON objects for service discovery, health checks, and service
//! assignment. Replies echo the request id of the command they answer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Commands the gateway may send to the receiver.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Asks what services this receiver can handle.
    ServiceCapabilityRequest {
        /// Correlation id echoed back in the response.
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Asks whether the receiver considers itself healthy.
    HealthCheckRequest {
        /// Correlation id echoed back in the response.
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Informs the receiver which services the gateway routed to it.
    ServiceAssignment {
        /// Correlation id echoed back in the ack.
        #[serde(default)]
        request_id: Option<String>,
        /// Service path patterns assigned to this connection.
        #[serde(default)]
        assigned_services: Vec<String>,
    },
}

/// Replies and notifications the receiver sends to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceiverReply {
    /// Sent once per connection, before any traffic.
    ConnectionReady {
        /// Unix seconds at send time.
        timestamp: i64,
        /// Identifier for this connection instance.
        connection_id: String,
    },
    /// Answer to [`GatewayCommand::ServiceCapabilityRequest`].
    ServiceCapabilityResponse {
        /// Echoed correlation id.
        request_id: Option<String>,
        /// Unix seconds at send time.
        timestamp: i64,
        /// What this receiver can do.
        capabilities: Capabilities,
    },
    /// Answer to [`GatewayCommand::HealthCheckRequest`].
    HealthCheckResponse {
        /// Echoed correlation id.
        request_id: Option<String>,
        /// Unix seconds at send time.
        timestamp: i64,
        /// Always `"healthy"` while the loops are running.
        status: String,
        /// Liveness booleans for the gateway's dashboard.
        details: HealthDetails,
    },
    /// Answer to [`GatewayCommand::ServiceAssignment`].
    ServiceAssignmentAck {
        /// Echoed correlation id.
        request_id: Option<String>,
        /// Unix seconds at send time.
        timestamp: i64,
        /// Always `"accepted"`.
        status: String,
        /// Echoed service list.
        assigned_services: Vec<String>,
    },
}

/// Capability summary advertised to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    /// Service path patterns this receiver serves.
    pub supported_services: Vec<String>,
    /// How many requests may be in flight at once.
    pub max_concurrent_requests: usize,
    /// Whether HTTP-shaped requests are accepted.
    pub supports_http: bool,
    /// Whether WebSocket upgrade requests are accepted.
    pub supports_websocket: bool,
    /// Whether health checks are answered.
    pub health_check_available: bool,
}

/// Liveness detail booleans in a health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthDetails {
    /// WebSocket link is up.
    pub connected: bool,
    /// Read and keepalive loops are running.
    pub running: bool,
    /// A request handler is installed.
    pub handler_ready: bool,
}

impl ReceiverReply {
    /// Builds the connection-ready notification with a fresh connection id.
    #[must_use]
    pub fn connection_ready() -> Self {
        Self::ConnectionReady {
            timestamp: Utc::now().timestamp(),
            connection_id: Uuid::new_v4().to_string(),
        }
    }

    /// Builds a capability response from the configured service surface.
    #[must_use]
    pub fn capabilities(
        request_id: Option<String>,
        supported_services: Vec<String>,
        max_concurrent_requests: usize,
    ) -> Self {
        Self::ServiceCapabilityResponse {
            request_id,
            timestamp: Utc::now().timestamp(),
            capabilities: Capabilities {
                supported_services,
                max_concurrent_requests,
                supports_http: true,
                supports_websocket: true,
                health_check_available: true,
            },
        }
    }

    /// Builds a healthy health-check response.
    #[must_use]
    pub fn healthy(request_id: Option<String>, details: HealthDetails) -> Self {
        Self::HealthCheckResponse {
            request_id,
            timestamp: Utc::now().timestamp(),
            status: "healthy".to_string(),
            details,
        }
    }

    /// Builds an accepting assignment ack echoing the assigned services.
    #[must_use]
    pub fn assignment_accepted(
        request_id: Option<String>,
        assigned_services: Vec<String>,
    ) -> Self {
        Self::ServiceAssignmentAck {
            request_id,
            timestamp: Utc::now().timestamp(),
            status: "accepted".to_string(),
            assigned_services,
        }
    }

    /// Serializes the reply for a WebSocket text frame.
    ///
    /// # Errors
    ///
    /// Propagates the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parses a control text frame.
///
/// Returns `None` for frames that are not valid JSON or carry an unknown
/// `type`; both cases are logged at debug and otherwise ignored, so a newer
/// gateway never breaks an older receiver.
#[must_use]
pub fn parse_command(text: &str) -> Option<GatewayCommand> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "ignoring unparseable control frame");
            return None;
        }
    };
    match GatewayCommand::deserialize(&value) {
        Ok(command) => Some(command),
        Err(_) => {
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("<none>");
            debug!(message_type = kind, "ignoring unknown control message");
            None
        }
    }
}
