use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Rendered fetch error: {0}")]
    Rendered(String),

    #[error("AI extraction error: {0}")]
    Ai(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// True when the underlying database error is a unique-constraint
    /// violation; used by the notification claim to detect a lost race.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn test_validation_error_display() {
        let err = AppError::Validation("url must be http(s)".to_string());
        assert_eq!(err.to_string(), "Validation error: url must be http(s)");
    }

    #[test]
    fn test_not_found_display() {
        let err = AppError::NotFound {
            resource: "item".to_string(),
        };
        assert_eq!(err.to_string(), "Not found: item");
    }

    #[test]
    fn test_non_database_error_is_not_unique_violation() {
        let err = AppError::Internal("boom".to_string());
        assert!(!err.is_unique_violation());
    }
}
