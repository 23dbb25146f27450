//! Error handling for Gantry Core.
//!
//! Each subsystem owns a `thiserror` enum ([`CatalogError`], [`ListenerError`],
//! [`StatusError`], [`TroubleshooterError`]). [`GantryError`] aggregates them
//! for callers that cross subsystem boundaries and maps every failure onto a
//! stable, machine-readable [`ErrorCode`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use gantry_core::error::{GantryError, Result};
//!
//! async fn first_job(catalog: &FsJobCatalog) -> Result<JobSpec> {
//!     let spec = catalog.get_job_spec("a.pull").await?;
//!     Ok(spec)
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use crate::catalog::listeners::ListenerError;
pub use crate::catalog::CatalogError;
pub use crate::status::issues::TroubleshooterError;
pub use crate::status::StatusError;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Gantry operations.
pub type Result<T> = std::result::Result<T, GantryError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Catalog Errors (1000-1099)
    JobSpecNotFound,
    CatalogIoFailed,
    JobSpecDecodeFailed,
    InvalidCatalogConfig,
    CatalogTaskFailed,

    // Listener Errors (1100-1199)
    ListenerRejected,
    ListenerPanicked,

    // Status Errors (2000-2099)
    MissingStatusField,
    InvalidStatusField,
    StateStoreFailed,

    // Diagnostics Errors (2100-2199)
    IssueLookupFailed,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobSpecNotFound => 1000,
            Self::CatalogIoFailed => 1001,
            Self::JobSpecDecodeFailed => 1002,
            Self::InvalidCatalogConfig => 1003,
            Self::CatalogTaskFailed => 1004,

            Self::ListenerRejected => 1100,
            Self::ListenerPanicked => 1101,

            Self::MissingStatusField => 2000,
            Self::InvalidStatusField => 2001,
            Self::StateStoreFailed => 2002,

            Self::IssueLookupFailed => 2100,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CatalogIoFailed | Self::StateStoreFailed | Self::IssueLookupFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "catalog",
            1100..=1199 => "listener",
            2000..=2099 => "status",
            2100..=2199 => "diagnostics",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Gantry Core.
#[derive(Debug, Error)]
pub enum GantryError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Troubleshooter(#[from] TroubleshooterError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GantryError {
    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Catalog(e) => e.code(),
            Self::Listener(e) => e.code(),
            Self::Status(e) => e.code(),
            Self::Troubleshooter(_) => ErrorCode::IssueLookupFailed,
            Self::Config(_) => ErrorCode::ConfigurationError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Check if this error reports a missing job specification.
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::JobSpecNotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::JobSpecNotFound.category(), "catalog");
        assert_eq!(ErrorCode::ListenerPanicked.category(), "listener");
        assert_eq!(ErrorCode::InvalidStatusField.category(), "status");
        assert_eq!(ErrorCode::IssueLookupFailed.category(), "diagnostics");
        assert_eq!(ErrorCode::ConfigurationError.category(), "configuration");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::CatalogIoFailed.is_retryable());
        assert!(ErrorCode::StateStoreFailed.is_retryable());
        assert!(!ErrorCode::JobSpecNotFound.is_retryable());
        assert!(!ErrorCode::InvalidStatusField.is_retryable());
    }

    #[test]
    fn test_gantry_error_from_catalog_error() {
        let err: GantryError = CatalogError::NotFound("missing.pull".to_string()).into();
        assert!(err.is_not_found());
        assert_eq!(err.code().numeric_code(), 1000);
        assert!(err.to_string().contains("missing.pull"));
    }

    #[test]
    fn test_gantry_error_from_status_error() {
        let err: GantryError = StatusError::MissingField("flowName").into();
        assert_eq!(err.code(), ErrorCode::MissingStatusField);
        assert!(!err.is_retryable());
    }
}
