//! Inbound requests for immediate and scheduled sends.

use jiff::Timestamp;
use serde::Deserialize;
use validator::Validate;

use crate::models::Target;

/// Send a message now.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendRequest {
    #[validate(length(min = 1, max = 1600, message = "Message must be between 1 and 1600 characters"))]
    pub message: String,

    pub target: Target,

    /// Deliver only to the configured test phone
    #[serde(default)]
    pub test_mode: bool,

    /// Append the configured opt-out footer to the message
    #[serde(default)]
    pub append_opt_out_footer: bool,
}

/// Send a message at a future time.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScheduleRequest {
    #[validate(length(min = 1, max = 1600, message = "Message must be between 1 and 1600 characters"))]
    pub message: String,

    pub target: Target,

    /// UTC trigger time; must be in the future when enqueued
    pub trigger_time: Timestamp,

    #[serde(default)]
    pub test_mode: bool,

    #[serde(default)]
    pub append_opt_out_footer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_length_bounds() {
        let mut request = SendRequest {
            message: String::new(),
            target: Target::Community,
            test_mode: false,
            append_opt_out_footer: false,
        };
        assert!(request.validate().is_err());

        request.message = "x".repeat(1600);
        assert!(request.validate().is_ok());

        request.message = "é".repeat(1601);
        let err = crate::error::AppError::from(request.validate().unwrap_err());
        assert!(err.reason().contains("1600"));
    }

    #[test]
    fn test_schedule_request_deserializes() {
        let request: ScheduleRequest = serde_json::from_str(
            r#"{"message":"Hi","target":{"kind":"event","event_id":4},"trigger_time":"2026-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(request.target, Target::Event(4));
        assert!(!request.test_mode);
        assert!(request.validate().is_ok());
    }
}
