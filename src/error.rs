/// Errors raised by progress stores, the HTTP client and the sync pipeline
#[derive(thiserror::Error, Debug)]
pub enum ProgressError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid progress payload: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Progress service error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProgressError {
    /// Whether retrying the same request could succeed later
    ///
    /// Store and network unavailability are transient. A structurally invalid
    /// payload or a missing record will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProgressError::Database(_) | ProgressError::HttpClient(_) | ProgressError::Upstream(_) => {
                true
            }
            ProgressError::Validation(_) | ProgressError::NotFound(_) | ProgressError::Internal(_) => {
                false
            }
        }
    }
}

pub type ProgressResult<T> = Result<T, ProgressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_transient() {
        let err = ProgressError::Validation("duration must be positive".to_string());
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Invalid progress payload: duration must be positive"
        );
    }

    #[test]
    fn test_upstream_is_transient() {
        assert!(ProgressError::Upstream("503".to_string()).is_transient());
        assert!(ProgressError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!ProgressError::NotFound("progress".to_string()).is_transient());
    }
}
