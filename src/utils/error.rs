use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Optimistic concurrency conflict on {document}")]
    OccConflict { document: String },

    #[error("Invocation of {function} failed: {message}")]
    InvocationError { function: String, message: String },

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Saga transaction failed and compensated. Details: {details}")]
    SagaAborted {
        transaction_id: String,
        details: serde_json::Value,
    },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Publish error: {message}")]
    PublishError { message: String },
}

impl PatternError {
    pub fn validation(message: impl Into<String>) -> Self {
        PatternError::ValidationError {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        PatternError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        PatternError::StorageError {
            message: message.into(),
        }
    }

    /// HTTP status a proxy handler answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            PatternError::ValidationError { .. } | PatternError::SerializationError(_) => 400,
            PatternError::Unauthorized { .. } => 401,
            PatternError::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Only OCC conflicts are worth re-running; everything else is passed through.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PatternError::OccConflict { .. })
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            PatternError::ConfigError { .. }
            | PatternError::MissingConfigError { .. }
            | PatternError::InvalidConfigValueError { .. }
            | PatternError::ConfigValidationError { .. } => {
                format!("Configuration problem: {}", self)
            }
            PatternError::IoError(e) => format!("Could not read or write a file: {}", e),
            PatternError::ApiError(e) => format!("Remote call failed: {}", e),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PatternError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(PatternError::validation("bad").status_code(), 400);
        assert_eq!(PatternError::not_found("Person", "42").status_code(), 404);
        assert_eq!(
            PatternError::Unauthorized {
                message: "sig".into()
            }
            .status_code(),
            401
        );
        assert_eq!(PatternError::storage("boom").status_code(), 500);
        assert_eq!(
            PatternError::OccConflict {
                document: "person/1".into()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_only_occ_conflicts_are_retryable() {
        assert!(PatternError::OccConflict {
            document: "person/1".into()
        }
        .is_retryable());
        assert!(!PatternError::not_found("Person", "1").is_retryable());
        assert!(!PatternError::storage("boom").is_retryable());
    }

    #[test]
    fn test_saga_aborted_display_carries_details() {
        let err = PatternError::SagaAborted {
            transaction_id: "tx-1".into(),
            details: serde_json::json!({"transactionId": "tx-1"}),
        };
        assert!(err.to_string().contains("\"transactionId\":\"tx-1\""));
    }
}
