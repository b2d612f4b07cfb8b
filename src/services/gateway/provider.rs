//! Outbound SMS gateway abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Normalized answer of one gateway request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Whether the gateway accepted the message for delivery
    pub accepted: bool,
    /// Gateway message id, present on acceptance
    pub message_id: Option<String>,
    /// Gateway-reported message status (`queued`, `sent`, ...)
    pub status: Option<String>,
    /// HTTP status; `None` when the request never got a response
    pub http_status: Option<u16>,
    pub error_code: Option<i64>,
    pub error_text: Option<String>,
}

impl GatewayResponse {
    pub fn accepted(message_id: impl Into<String>, status: impl Into<String>, http_status: u16) -> Self {
        Self {
            accepted: true,
            message_id: Some(message_id.into()),
            status: Some(status.into()),
            http_status: Some(http_status),
            ..Self::default()
        }
    }

    pub fn rejected(http_status: u16, error_code: Option<i64>, error_text: impl Into<String>) -> Self {
        Self {
            http_status: Some(http_status),
            error_code,
            error_text: Some(error_text.into()),
            ..Self::default()
        }
    }

    /// The request failed before any response arrived.
    pub fn transport_failure(error_text: impl Into<String>) -> Self {
        Self {
            error_text: Some(error_text.into()),
            ..Self::default()
        }
    }

    /// Rate limiting, server-side errors and transport failures.
    pub fn is_transient(&self) -> bool {
        if self.accepted {
            return false;
        }
        match self.http_status {
            None => true,
            Some(status) => status == 429 || (500..600).contains(&status),
        }
    }
}

/// A single-message SMS gateway.
///
/// A rejected message is an `Ok` response with `accepted == false`; `Err`
/// is reserved for failures that make the gateway unusable as a whole.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> AppResult<GatewayResponse>;

    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Checks that the gateway can send at all, before a batch starts.
    async fn validate_config(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_detection() {
        assert!(GatewayResponse::rejected(429, None, "Too Many Requests").is_transient());
        assert!(GatewayResponse::rejected(503, None, "Service Unavailable").is_transient());
        assert!(GatewayResponse::transport_failure("connection reset").is_transient());
        assert!(!GatewayResponse::rejected(400, Some(21211), "invalid").is_transient());
        assert!(!GatewayResponse::accepted("SM1", "queued", 201).is_transient());
    }
}
