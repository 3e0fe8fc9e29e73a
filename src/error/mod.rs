//! Error handling for abg.
//!
//! This module provides:
//! - [`AbgError`]: The main error enum for all abg operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Rich error record with suggestion, details and timestamp
//! - Suggestion helpers for context-aware error recovery hints

mod codes;
mod suggestions;

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;
pub use suggestions::suggest_for_error;

/// Main error type for abg operations.
#[derive(Error, Debug)]
pub enum AbgError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsafe output path {}: {reason}", .path.display())]
    UnsafeOutputPath { path: PathBuf, reason: String },

    #[error("Packaging failed during {stage}: {message}")]
    Packaging {
        stage: String,
        message: String,
        partial_path: Option<PathBuf>,
    },

    #[error("Unknown package format: {0}")]
    UnknownFormat(String),

    #[error("No manifest.json found in {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Invalid manifest {}: {reason}", .path.display())]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Distribution to {platform} failed for {repository}: {message}")]
    Distribution {
        platform: String,
        repository: String,
        message: String,
    },

    #[error("Rate limit exhausted for {endpoint}; retry after {retry_after_seconds}s")]
    RateLimit {
        retry_after_seconds: u64,
        endpoint: String,
    },

    #[error("Timeout: {operation} exceeded {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Host tool unavailable: {0}")]
    HostUnavailable(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Upstream unresolved: {0}")]
    UpstreamUnresolved(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AbgError {
    /// Packaging failure at `stage`, wrapping `cause`.
    pub fn packaging(stage: &str, cause: impl std::fmt::Display) -> Self {
        Self::Packaging {
            stage: stage.to_string(),
            message: cause.to_string(),
            partial_path: None,
        }
    }

    /// Packaging failure at `stage` that left output at `partial` for the caller to clean.
    pub fn packaging_at(stage: &str, cause: impl std::fmt::Display, partial: PathBuf) -> Self {
        Self::Packaging {
            stage: stage.to_string(),
            message: cause.to_string(),
            partial_path: Some(partial),
        }
    }

    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::SerializationError,
            Self::TomlParse(_) | Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::UnsafeOutputPath { .. } => ErrorCode::UnsafeOutputPath,
            Self::Packaging { .. } => ErrorCode::PackagingFailed,
            Self::UnknownFormat(_) => ErrorCode::UnknownFormat,
            Self::ManifestMissing(_) => ErrorCode::ManifestMissing,
            Self::ManifestInvalid { .. } => ErrorCode::ManifestInvalid,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::Distribution { .. } => ErrorCode::DistributionFailed,
            Self::RateLimit { .. } => ErrorCode::RateLimited,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::HostUnavailable(_) => ErrorCode::HostUnavailable,
            Self::Git(_) => ErrorCode::GitError,
            Self::UpstreamUnresolved(_) => ErrorCode::UpstreamUnresolved,
            Self::Backup(_) => ErrorCode::BackupFailed,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
            Self::NotFound(_) => ErrorCode::NotFound,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::UnsafeOutputPath { path, reason } => Some(serde_json::json!({
                "path": path.display().to_string(),
                "reason": reason,
            })),
            Self::Packaging {
                stage,
                partial_path,
                ..
            } => {
                let mut ctx = serde_json::json!({ "stage": stage });
                if let Some(path) = partial_path {
                    ctx["partial_path"] = Value::String(path.display().to_string());
                }
                Some(ctx)
            }
            Self::UnknownFormat(format) => Some(serde_json::json!({ "format": format })),
            Self::ManifestMissing(path) => {
                Some(serde_json::json!({ "path": path.display().to_string() }))
            }
            Self::ChecksumMismatch {
                path,
                expected,
                actual,
            } => Some(serde_json::json!({
                "path": path,
                "expected": expected,
                "actual": actual,
            })),
            Self::Distribution {
                platform,
                repository,
                ..
            } => Some(serde_json::json!({ "platform": platform, "repository": repository })),
            Self::RateLimit {
                retry_after_seconds,
                endpoint,
            } => Some(serde_json::json!({
                "retry_after_seconds": retry_after_seconds,
                "endpoint": endpoint,
            })),
            Self::Timeout {
                operation,
                timeout_seconds,
            } => Some(serde_json::json!({
                "operation": operation,
                "timeout_seconds": timeout_seconds,
            })),
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }

    /// Seconds until a retry makes sense, for rate-limit errors.
    #[must_use]
    pub const fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimit {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_abg_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, details and timestamp.
///
/// This is what `--json` output and [`DistributionResult`] carry, so a
/// presentation layer can act on failures without knowing the core.
///
/// [`DistributionResult`]: crate::distributor::DistributionResult
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "RATE_LIMITED")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 502)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Structured details for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether this error is potentially recoverable by the user
    pub recoverable: bool,

    /// Error category (e.g., "packaging", "distribution")
    pub category: String,

    /// Seconds to wait before retrying, for rate limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,

    /// When the error was recorded
    pub timestamp: DateTime<Utc>,
}

impl StructuredError {
    /// Create a new structured error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            retry_after_seconds: None,
            timestamp: Utc::now(),
            code,
            message: message.into(),
        }
    }

    /// Create a structured error from an [`AbgError`].
    #[must_use]
    pub fn from_abg_error(err: &AbgError) -> Self {
        let code = err.code();
        let context = err.context();
        let suggestion = suggest_for_error(code, context.as_ref());

        Self {
            code,
            numeric_code: code.numeric(),
            message: err.to_string(),
            suggestion,
            context,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            retry_after_seconds: err.retry_after_seconds(),
            timestamp: Utc::now(),
        }
    }

    /// Add context to this error.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.retry_after_seconds = context
            .get("retry_after_seconds")
            .and_then(Value::as_u64)
            .or(self.retry_after_seconds);
        self.context = Some(context);
        self.suggestion = suggest_for_error(self.code, self.context.as_ref());
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<AbgError> for StructuredError {
    fn from(err: AbgError) -> Self {
        Self::from_abg_error(&err)
    }
}

impl From<&AbgError> for StructuredError {
    fn from(err: &AbgError) -> Self {
        Self::from_abg_error(err)
    }
}

/// Result type alias using AbgError.
pub type Result<T> = std::result::Result<T, AbgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abg_error_code_mapping() {
        assert_eq!(
            AbgError::Validation("bad".into()).code(),
            ErrorCode::ValidationFailed
        );
        assert_eq!(
            AbgError::packaging("agent write", "disk full").code(),
            ErrorCode::PackagingFailed
        );
        assert_eq!(
            AbgError::Timeout {
                operation: "git clone".into(),
                timeout_seconds: 120
            }
            .code(),
            ErrorCode::Timeout
        );
    }

    #[test]
    fn test_packaging_error_names_stage_and_partial_path() {
        let err = AbgError::packaging_at("manifest write", "denied", PathBuf::from("/tmp/x"));
        assert!(err.to_string().contains("manifest write"));
        let ctx = err.context().unwrap();
        assert_eq!(ctx["stage"], "manifest write");
        assert_eq!(ctx["partial_path"], "/tmp/x");
    }

    #[test]
    fn test_structured_error_carries_retry_after() {
        let err = AbgError::RateLimit {
            retry_after_seconds: 42,
            endpoint: "github".into(),
        };
        let structured = err.to_structured();
        assert_eq!(structured.code, ErrorCode::RateLimited);
        assert_eq!(structured.retry_after_seconds, Some(42));
        assert!(structured.suggestion.contains("42s"));
        assert_eq!(structured.category, "distribution");
    }

    #[test]
    fn test_structured_error_serialization() {
        let err = StructuredError::new(ErrorCode::UnknownFormat, "Unknown package format: rar");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("UNKNOWN_FORMAT"));
        assert!(json.contains("\"numeric_code\":202"));
        assert!(json.contains("\"timestamp\""));
        assert!(!json.contains("retry_after_seconds"));
    }

    #[test]
    fn test_structured_error_with_context() {
        let err = StructuredError::new(ErrorCode::UnknownFormat, "bad format")
            .with_context(serde_json::json!({ "format": "rar" }));
        assert!(err.suggestion.contains("rar"));
    }

    #[test]
    fn test_structured_error_display() {
        let err = AbgError::UnknownFormat("rar".into()).to_structured();
        let display = format!("{err}");
        assert!(display.contains("E202"));
        assert!(display.contains("rar"));
    }
}
