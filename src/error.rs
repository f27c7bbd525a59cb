use thiserror::Error;

/// Convenience type alias for Results with AssistError
pub type Result<T> = std::result::Result<T, AssistError>;

/// Coarse error taxonomy surfaced across component boundaries.
///
/// Transports map these to their native error shapes; the retry loop
/// branches on the kind, never on concrete error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    ServiceUnavailable,
    Timeout,
    Transient,
    Cancelled,
    Internal,
}

/// Main error type for assist-core
///
/// This enum represents all possible errors that can occur within
/// the assist-core runtime, providing detailed error context for
/// debugging and error handling.
#[derive(Error, Debug)]
pub enum AssistError {
    #[error("Provider API error: {0}")]
    ProviderApi(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Agent error: {message}")]
    Agent { message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AssistError {
    /// Map the concrete variant onto the boundary taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssistError::ProviderApi(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() || e.is_request() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Internal
                }
            }
            AssistError::InvalidArgument(_) | AssistError::Validation(_) => {
                ErrorKind::InvalidArgument
            }
            AssistError::NotFound(_) => ErrorKind::NotFound,
            AssistError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AssistError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            AssistError::Timeout { .. } => ErrorKind::Timeout,
            AssistError::Transient { .. } => ErrorKind::Transient,
            AssistError::Cancelled => ErrorKind::Cancelled,
            AssistError::ConfigurationError(_) | AssistError::Unauthorized => {
                ErrorKind::InvalidArgument
            }
            AssistError::Serialization(_)
            | AssistError::Agent { .. }
            | AssistError::TaskExecution { .. }
            | AssistError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the dispatcher may retry after this error.
    ///
    /// Timeouts and transient network failures are retryable; validation,
    /// cancellation and programming errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Transient)
    }
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::ServiceUnavailable => "ServiceUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Transient => "Transient",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            AssistError::InvalidArgument("bad".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            AssistError::ServiceUnavailable("breaker open".into()).kind(),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(AssistError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_retry_classification() {
        assert!(AssistError::Timeout {
            message: "deadline".into()
        }
        .is_retryable());
        assert!(AssistError::Transient {
            message: "reset by peer".into()
        }
        .is_retryable());
        assert!(!AssistError::Validation("empty prompt".into()).is_retryable());
        assert!(!AssistError::Cancelled.is_retryable());
    }
}
