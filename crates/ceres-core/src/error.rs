use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while harvesting,
/// storing, and aggregating catalog records. It uses the `thiserror` crate for
/// ergonomic error handling and automatic conversion from underlying library
/// errors.
///
/// # Error families
///
/// - **Transport**: the catalog request failed before any record could be read
///   (`TransportError`, `NetworkError`, `Timeout`, `RateLimitExceeded`,
///   `ServerError`).
/// - **Format**: a body came back but could not be decoded
///   (`FormatError`, `SerializationError`).
/// - **Validation**: a single record cannot be normalized (`ValidationError`).
///
/// Transport and format errors end a harvest run early; validation errors only
/// skip the offending record.
///
/// # Examples
///
/// ```no_run
/// use ceres_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// This error wraps all errors from SQLx database operations, including
    /// connection failures, query errors, and constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The catalog answered with a non-success status that is not worth retrying.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Network or connection error.
    ///
    /// This error occurs when a network request fails due to connectivity issues,
    /// DNS resolution failures, or the remote server being unreachable.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    ///
    /// This error occurs when a request takes longer than the configured timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// The catalog returned a 5xx status.
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Response body was present but did not have the expected shape.
    #[error("Format error: {0}")]
    FormatError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A single record could not be normalized.
    ///
    /// Raised for records that are missing their external id or carry a
    /// structurally broken tag/group list. The harvest skips the record and
    /// keeps going.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid CKAN portal URL provided.
    ///
    /// This error occurs when the provided CKAN portal URL is malformed
    /// or cannot be used to construct valid API endpoints.
    #[error("Invalid CKAN portal URL: {0}")]
    InvalidPortalUrl(String),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Dataset not found in the database.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// Another harvest run holds the run lease.
    #[error("Harvest already in progress: {0}")]
    HarvestInProgress(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Try: docker-compose up -d".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::TransportError(msg) => {
                format!("Catalog request failed: {}\n   Check the catalog base URL.", msg)
            }
            AppError::InvalidPortalUrl(url) => {
                format!(
                    "Invalid portal URL: {}\n   Example: https://www.donneesquebec.ca/recherche/api/3/action",
                    url
                )
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!("Request timed out after {} seconds.\n   The server may be overloaded. Try again later.", secs)
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::ServerError(status) => {
                format!(
                    "The catalog returned HTTP {}.\n   The portal may be temporarily unavailable.",
                    status
                )
            }
            AppError::FormatError(msg) => {
                format!("Unexpected response from the catalog: {}", msg)
            }
            AppError::HarvestInProgress(holder) => {
                format!(
                    "Another harvest is running ({}).\n   Wait for it to finish or let the lease expire.",
                    holder
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use ceres_core::error::AppError;
    ///
    /// // Network errors are retryable
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// // Rate limits are retryable (after a delay)
    /// let err = AppError::RateLimitExceeded;
    /// assert!(err.is_retryable());
    ///
    /// // A 404 is NOT retryable
    /// let err = AppError::TransportError("HTTP 404".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ServerError(_)
        )
    }

    /// Returns true for errors raised while fetching a page.
    ///
    /// These end the current harvest run; already committed pages stay.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            AppError::TransportError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ServerError(_)
                | AppError::FormatError(_)
                | AppError::SerializationError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::DatasetNotFound("test-id".to_string());
        assert_eq!(err.to_string(), "Dataset not found: test-id");
    }

    #[test]
    fn test_generic_error() {
        let err = AppError::Generic("Something went wrong".to_string());
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::ValidationError("missing id".to_string());
        assert_eq!(err.to_string(), "Validation error: missing id");
        assert!(!err.is_fetch_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_portal_url() {
        let err = AppError::InvalidPortalUrl("not a url".to_string());
        assert!(err.to_string().contains("Invalid CKAN portal URL"));
    }

    #[test]
    fn test_error_from_serde() {
        let json = "{ invalid json }";
        let result: Result<serde_json::Value, _> = serde_json::from_str(json);
        let serde_err = result.unwrap_err();
        let app_err: AppError = serde_err.into();
        assert!(matches!(app_err, AppError::SerializationError(_)));
        assert!(app_err.is_fetch_failure());
    }

    #[test]
    fn test_user_message_database_connection() {
        // PoolTimedOut message contains "connection", so it triggers the connection error branch
        let err = AppError::DatabaseError(sqlx::Error::PoolTimedOut);
        let msg = err.user_message();
        assert!(msg.contains("Cannot connect to database") || msg.contains("Database error"));
    }

    #[test]
    fn test_user_message_harvest_in_progress() {
        let err = AppError::HarvestInProgress("worker-1".to_string());
        assert!(err.user_message().contains("worker-1"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(AppError::NetworkError("timeout".to_string()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(AppError::ServerError(503).is_retryable());
        assert!(!AppError::TransportError("HTTP 404".to_string()).is_retryable());
        assert!(!AppError::FormatError("bad body".to_string()).is_retryable());
        assert!(!AppError::InvalidPortalUrl("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_fetch_failure_family() {
        assert!(AppError::TransportError("HTTP 404".to_string()).is_fetch_failure());
        assert!(AppError::FormatError("missing result".to_string()).is_fetch_failure());
        assert!(AppError::ServerError(500).is_fetch_failure());
        assert!(!AppError::DatabaseError(sqlx::Error::PoolTimedOut).is_fetch_failure());
    }

    #[test]
    fn test_timeout_error() {
        let err = AppError::Timeout(30);
        assert_eq!(err.to_string(), "Request timed out after 30 seconds");
    }
}
