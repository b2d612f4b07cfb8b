use crate::error::AppError;
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};

/// Postgres messages that indicate lock contention rather than a broken statement.
const CONTENTION_MARKERS: [&str; 4] = [
    "lock timeout",
    "could not obtain lock",
    "deadlock detected",
    "could not serialize access",
];

/// Utility for converting database errors to structured AppError variants.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    /// Converts a Diesel error to an appropriate AppError variant.
    ///
    /// # Arguments
    /// * `error` - The Diesel error to convert
    /// * `operation` - Description of the database operation that failed
    pub fn convert_diesel_error(error: DieselError, operation: &str) -> AppError {
        match error {
            DieselError::DatabaseError(kind, info) => {
                Self::convert_database_error(kind, info.as_ref(), operation)
            }
            DieselError::NotFound => AppError::NotFound {
                entity: "resource".to_string(),
                field: "id".to_string(),
                value: "unknown".to_string(),
            },
            other => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::from(other),
            },
        }
    }

    fn convert_database_error(
        kind: DatabaseErrorKind,
        info: &(dyn DatabaseErrorInformation + Send + Sync),
        operation: &str,
    ) -> AppError {
        let message = info.message();
        let entity = info.table_name().unwrap_or("resource").to_string();

        match kind {
            DatabaseErrorKind::SerializationFailure => AppError::Contention {
                operation: operation.to_string(),
            },
            _ if Self::is_contention_message(message) => AppError::Contention {
                operation: operation.to_string(),
            },
            DatabaseErrorKind::UniqueViolation => {
                let (field, value) = Self::extract_key_value(info.details().unwrap_or(message))
                    .unwrap_or_else(|| {
                        (
                            info.constraint_name().unwrap_or("key").to_string(),
                            "unknown".to_string(),
                        )
                    });
                AppError::Duplicate {
                    entity,
                    field,
                    value,
                }
            }
            DatabaseErrorKind::NotNullViolation => AppError::Validation {
                field: info.column_name().unwrap_or("unknown").to_string(),
                reason: format!("Field is required for {}", entity),
            },
            DatabaseErrorKind::ForeignKeyViolation => {
                let (field, value) = Self::extract_key_value(info.details().unwrap_or(message))
                    .unwrap_or_else(|| {
                        (
                            info.constraint_name().unwrap_or("reference").to_string(),
                            "unknown".to_string(),
                        )
                    });
                AppError::Validation {
                    field,
                    reason: format!("Invalid reference with value '{}'", value),
                }
            }
            _ => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::msg(format!("Database error: {}", message)),
            },
        }
    }

    fn is_contention_message(message: &str) -> bool {
        let lowered = message.to_lowercase();
        CONTENTION_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    /// Pulls `(column, value)` out of a Postgres `Key (column)=(value)` detail line.
    fn extract_key_value(detail: &str) -> Option<(String, String)> {
        let start = detail.find("Key (")? + "Key (".len();
        let rest = &detail[start..];
        let close = rest.find(")=(")?;
        let column = &rest[..close];
        let value_rest = &rest[close + ")=(".len()..];
        let value_end = value_rest.find(')')?;
        Some((column.to_string(), value_rest[..value_end].to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockDatabaseErrorInfo {
        message: String,
        details: Option<String>,
        table_name: Option<String>,
        column_name: Option<String>,
        constraint_name: Option<String>,
    }

    impl MockDatabaseErrorInfo {
        fn with_message(message: &str) -> Self {
            Self {
                message: message.to_string(),
                details: None,
                table_name: None,
                column_name: None,
                constraint_name: None,
            }
        }
    }

    impl DatabaseErrorInformation for MockDatabaseErrorInfo {
        fn message(&self) -> &str {
            &self.message
        }

        fn details(&self) -> Option<&str> {
            self.details.as_deref()
        }

        fn hint(&self) -> Option<&str> {
            None
        }

        fn table_name(&self) -> Option<&str> {
            self.table_name.as_deref()
        }

        fn column_name(&self) -> Option<&str> {
            self.column_name.as_deref()
        }

        fn constraint_name(&self) -> Option<&str> {
            self.constraint_name.as_deref()
        }

        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    #[test]
    fn test_convert_not_found_error() {
        let result = DatabaseErrorConverter::convert_diesel_error(DieselError::NotFound, "find job");
        assert!(matches!(result, AppError::NotFound { .. }));
    }

    #[test]
    fn test_convert_unique_violation_uses_detail_line() {
        let mut info = MockDatabaseErrorInfo::with_message(
            "duplicate key value violates unique constraint \"delivery_results_batch_id_position_key\"",
        );
        info.details = Some("Key (batch_id, \"position\")=(7, 2) already exists.".to_string());
        info.table_name = Some("delivery_results".to_string());

        let error = DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, Box::new(info));

        match DatabaseErrorConverter::convert_diesel_error(error, "append result") {
            AppError::Duplicate {
                entity,
                field,
                value,
            } => {
                assert_eq!(entity, "delivery_results");
                assert_eq!(field, "batch_id, \"position\"");
                assert_eq!(value, "7, 2");
            }
            other => panic!("Expected Duplicate error, got: {:?}", other),
        }
    }

    #[test]
    fn test_convert_serialization_failure_to_contention() {
        let info = MockDatabaseErrorInfo::with_message(
            "could not serialize access due to concurrent update",
        );
        let error =
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, Box::new(info));

        match DatabaseErrorConverter::convert_diesel_error(error, "claim job") {
            AppError::Contention { operation } => assert_eq!(operation, "claim job"),
            other => panic!("Expected Contention error, got: {:?}", other),
        }
    }

    #[test]
    fn test_convert_lock_timeout_message_to_contention() {
        let info = MockDatabaseErrorInfo::with_message(
            "canceling statement due to lock timeout",
        );
        let error = DieselError::DatabaseError(DatabaseErrorKind::Unknown, Box::new(info));

        let result = DatabaseErrorConverter::convert_diesel_error(error, "claim job");
        assert!(result.is_retryable_contention());
    }

    #[test]
    fn test_convert_not_null_violation() {
        let mut info = MockDatabaseErrorInfo::with_message(
            "null value in column \"phone\" violates not-null constraint",
        );
        info.table_name = Some("suppressions".to_string());
        info.column_name = Some("phone".to_string());

        let error = DieselError::DatabaseError(DatabaseErrorKind::NotNullViolation, Box::new(info));

        match DatabaseErrorConverter::convert_diesel_error(error, "upsert suppression") {
            AppError::Validation { field, reason } => {
                assert_eq!(field, "phone");
                assert!(reason.contains("required"));
            }
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[test]
    fn test_convert_foreign_key_violation() {
        let mut info = MockDatabaseErrorInfo::with_message(
            "insert or update on table \"scheduled_jobs\" violates foreign key constraint",
        );
        info.details =
            Some("Key (batch_id)=(999) is not present in table \"delivery_batches\".".to_string());

        let error =
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, Box::new(info));

        match DatabaseErrorConverter::convert_diesel_error(error, "attach batch") {
            AppError::Validation { field, reason } => {
                assert_eq!(field, "batch_id");
                assert!(reason.contains("999"));
            }
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}
