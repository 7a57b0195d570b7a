//! Error types for Bulkmail

use thiserror::Error;

/// Main error type for Bulkmail
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Daily limit reached ({used}/{limit})")]
    QuotaExceeded { used: i32, limit: i32 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Bulkmail
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Auth(_) => 401,
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::PermissionDenied(_) => 403,
            Error::Conflict(_) => 409,
            Error::QuotaExceeded { .. } => 429,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::PermissionDenied(_) => "FORBIDDEN",
            Error::Conflict(_) => "CONFLICT",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Message without the category prefix, for response bodies
    pub fn detail(&self) -> String {
        match self {
            Error::Config(msg)
            | Error::Database(msg)
            | Error::Auth(msg)
            | Error::Validation(msg)
            | Error::NotFound(msg)
            | Error::PermissionDenied(msg)
            | Error::Conflict(msg)
            | Error::Internal(msg) => msg.clone(),
            Error::QuotaExceeded { .. } | Error::Other(_) => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quota_error_maps_to_429() {
        let err = Error::QuotaExceeded { used: 10, limit: 10 };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.code(), "QUOTA_EXCEEDED");
        assert_eq!(err.to_string(), "Daily limit reached (10/10)");
    }

    #[test]
    fn test_validation_is_client_error() {
        let err = Error::Validation("Invalid email address".to_string());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.detail(), "Invalid email address");
    }
}
