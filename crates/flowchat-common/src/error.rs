//! Error types for Flow Chat

use thiserror::Error;

/// Main error type for Flow Chat
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Entitlement denied for {metric}: {current}/{limit}")]
    EntitlementDenied {
        metric: String,
        current: i64,
        limit: i64,
    },

    #[error("Instance unavailable: {0}")]
    InstanceUnavailable(String),

    #[error("No eligible instance for tenant")]
    NoEligibleInstance,

    #[error("Gateway rate limited")]
    RateLimited,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Transient gateway error: {0}")]
    TransientGateway(String),

    #[error("Permanent gateway error: {0}")]
    PermanentGateway(String),

    #[error("Media too large: {0} bytes")]
    MediaTooLarge(u64),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Flow Chat
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Storage(_) => 500,
            Error::Cache(_) => 500,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::PermissionDenied(_) => 403,
            Error::EntitlementDenied { .. } => 403,
            Error::InstanceUnavailable(_) => 503,
            Error::NoEligibleInstance => 503,
            Error::RateLimited => 429,
            Error::InvalidRecipient(_) => 422,
            Error::TransientGateway(_) => 502,
            Error::PermanentGateway(_) => 502,
            Error::MediaTooLarge(_) => 413,
            Error::MalformedEvent(_) => 400,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the stable error code string surfaced to API clients
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Cache(_) => "CACHE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::PermissionDenied(_) => "FORBIDDEN",
            Error::EntitlementDenied { .. } => "ENTITLEMENT_DENIED",
            Error::InstanceUnavailable(_) => "INSTANCE_UNAVAILABLE",
            Error::NoEligibleInstance => "NO_ELIGIBLE_INSTANCE",
            Error::RateLimited => "RATE_LIMITED",
            Error::InvalidRecipient(_) => "INVALID_RECIPIENT",
            Error::TransientGateway(_) => "TRANSIENT_GATEWAY_ERROR",
            Error::PermanentGateway(_) => "PERMANENT_GATEWAY_ERROR",
            Error::MediaTooLarge(_) => "MEDIA_TOO_LARGE",
            Error::MalformedEvent(_) => "MALFORMED_EVENT",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry may succeed without operator intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Cache(_)
                | Error::Storage(_)
                | Error::RateLimited
                | Error::TransientGateway(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entitlement_denied_code() {
        let err = Error::EntitlementDenied {
            metric: "instances".to_string(),
            current: 2,
            limit: 2,
        };
        assert_eq!(err.code(), "ENTITLEMENT_DENIED");
        assert_eq!(err.status_code(), 403);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientGateway("timeout".into()).is_transient());
        assert!(Error::RateLimited.is_transient());
        assert!(!Error::PermanentGateway("blocked".into()).is_transient());
        assert!(!Error::InvalidRecipient("x".into()).is_transient());
    }
}
