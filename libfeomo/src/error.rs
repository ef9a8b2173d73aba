//! Error types for Feomo

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeomoError>;

/// Top-level error returned by every fallible operation in the crate.
///
/// `Clone` is required because the request deduplicator hands the same
/// settled result to every caller that joined an in-flight request.
#[derive(Error, Debug, Clone)]
pub enum FeomoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(Arc<DbError>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FeomoError {
    /// Whether the error describes something the user has to act on
    /// (bad credentials, bad instance URL) as opposed to degraded
    /// infrastructure that the caller may absorb.
    pub fn is_user_actionable(&self) -> bool {
        match self {
            FeomoError::Config(_) | FeomoError::InvalidInput(_) => true,
            FeomoError::Api(ApiError::NotAuthenticated)
            | FeomoError::Api(ApiError::Authentication(_)) => true,
            FeomoError::Api(_) => false,
            FeomoError::Storage(_) | FeomoError::Database(_) => false,
        }
    }
}

impl From<DbError> for FeomoError {
    fn from(error: DbError) -> Self {
        FeomoError::Database(Arc::new(error))
    }
}

impl From<sqlx::Error> for FeomoError {
    fn from(error: sqlx::Error) -> Self {
        DbError::Sqlx(error).into()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Redirect URI is missing and no default redirect path provided")]
    MissingRedirectPath,

    #[error("Application origin is required to compute redirect URI")]
    MissingOrigin,

    #[error("Instance URL cannot be empty")]
    EmptyInstanceUrl,

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse environment file: {0}")]
    Parse(String),
}

/// Failures reported by the remote instance or the transport in between.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Not authenticated. Please login first.")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request rejected: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend failed: {0}")]
    Backend(String),

    #[error("Failed to serialize stored value: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_formatting_config() {
        let error = FeomoError::Config(ConfigError::MissingOrigin);
        assert_eq!(
            error.to_string(),
            "Configuration error: Application origin is required to compute redirect URI"
        );
    }

    #[test]
    fn test_error_message_formatting_api() {
        let error = FeomoError::Api(ApiError::Authentication("invalid_grant".to_string()));
        assert_eq!(error.to_string(), "API error: Authentication failed: invalid_grant");
    }

    #[test]
    fn test_user_actionable_classification() {
        assert!(FeomoError::Config(ConfigError::EmptyInstanceUrl).is_user_actionable());
        assert!(FeomoError::Api(ApiError::NotAuthenticated).is_user_actionable());
        assert!(FeomoError::InvalidInput("empty".to_string()).is_user_actionable());

        assert!(!FeomoError::Api(ApiError::Network("timeout".to_string())).is_user_actionable());
        assert!(!FeomoError::Storage(StorageError::Backend("full".to_string())).is_user_actionable());
    }

    #[test]
    fn test_db_error_conversion_is_shared() {
        let error: FeomoError = DbError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ))
        .into();
        let cloned = error.clone();

        match (error, cloned) {
            (FeomoError::Database(a), FeomoError::Database(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("Expected FeomoError::Database"),
        }
    }

    #[test]
    fn test_error_conversion_from_api_error() {
        let error: FeomoError = ApiError::RateLimit("slow down".to_string()).into();
        assert!(matches!(error, FeomoError::Api(ApiError::RateLimit(_))));
    }
}
