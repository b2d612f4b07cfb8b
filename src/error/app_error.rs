use crate::error::DatabaseErrorConverter;
use thiserror::Error;

/// Application-wide error type shared by the stores, the delivery pipeline
/// and the scheduler.
///
/// Variants carry structured context so callers can decide whether a failure
/// is fatal to a single operation (validation, invalid state), benign
/// (contention on a claim) or infrastructural (database, pool, gateway).
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error with entity, field, and value information
    #[error("Resource not found: {entity} with {field}={value}")]
    NotFound {
        entity: String,
        field: String,
        value: String,
    },

    /// Duplicate entry error for unique constraint violations
    #[error("Duplicate entry: {entity}.{field} = '{value}' already exists")]
    Duplicate {
        entity: String,
        field: String,
        value: String,
    },

    /// Validation error with field-specific details
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The record exists but is not in a state that allows the operation
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Lock timeout, deadlock or serialization failure in the store
    #[error("Storage contention during {operation}")]
    Contention { operation: String },

    /// A delivery batch was marked failed before any message was sent
    #[error("Batch {batch_id} aborted: {reason}")]
    BatchAborted { batch_id: i64, reason: String },

    /// The SMS gateway rejected the request as a whole
    #[error("Gateway {provider} error: {message}")]
    Gateway { provider: String, message: String },

    /// Database operation error with operation context
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error with key information
    #[error("Configuration error: {key}")]
    Configuration {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("Connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn not_found(entity: &str, field: &str, value: impl ToString) -> Self {
        AppError::NotFound {
            entity: entity.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        AppError::InvalidState {
            message: message.into(),
        }
    }

    /// Whether retrying the same statement may succeed.
    pub fn is_retryable_contention(&self) -> bool {
        matches!(self, AppError::Contention { .. })
    }

    /// Short human readable reason, used for error text stored on jobs and batches.
    pub fn reason(&self) -> String {
        match self {
            AppError::Validation { reason, .. } => reason.clone(),
            AppError::InvalidState { message } => message.clone(),
            AppError::BatchAborted { reason, .. } => reason.clone(),
            AppError::Gateway { message, .. } => message.clone(),
            AppError::Configuration { key, source } => format!("{key}: {source}"),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(error: diesel::result::Error) -> Self {
        DatabaseErrorConverter::convert_diesel_error(error, "database operation")
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.into_iter().next() {
            Some((field, field_errors)) => {
                let reason = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                AppError::Validation {
                    field: field.to_string(),
                    reason,
                }
            }
            None => AppError::Validation {
                field: "request".to_string(),
                reason: errors.to_string(),
            },
        }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 1, message = "Message must not be empty"))]
        message: String,
    }

    #[test]
    fn test_validation_errors_conversion_picks_field_and_message() {
        let sample = Sample {
            message: String::new(),
        };
        let error: AppError = sample.validate().unwrap_err().into();

        match error {
            AppError::Validation { field, reason } => {
                assert_eq!(field, "message");
                assert_eq!(reason, "Message must not be empty");
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_reason_strips_variant_prefix() {
        let error = AppError::validation("message", "Unsupported token {foo}");
        assert_eq!(error.reason(), "Unsupported token {foo}");
        assert!(error.to_string().starts_with("Validation failed for message"));
    }

    #[test]
    fn test_only_contention_is_retryable() {
        let contention = AppError::Contention {
            operation: "claim job".to_string(),
        };
        assert!(contention.is_retryable_contention());
        assert!(!AppError::invalid_state("done").is_retryable_contention());
    }
}
