//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Bundle manifest errors
//! - 2xx: Packaging errors
//! - 3xx: Config errors
//! - 4xx: Update errors
//! - 5xx: Distribution errors
//! - 6xx: Storage errors
//! - 8xx: Validation errors
//! - 9xx: Lookup errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for `--json` output.
///
/// Each variant maps to a numeric code (e.g., `ManifestMissing` -> E103).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Bundle manifest errors (1xx)
    // ========================================
    /// E103: No manifest.json inside a bundle or package
    ManifestMissing,
    /// E104: manifest.json exists but cannot be parsed
    ManifestInvalid,

    // ========================================
    // Packaging errors (2xx)
    // ========================================
    /// E201: A packaging or assembly stage failed
    PackagingFailed,
    /// E202: Requested archive format is not supported
    UnknownFormat,
    /// E203: A file does not match its recorded checksum
    ChecksumMismatch,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E301: Config file has invalid syntax or values
    ConfigInvalid,
    /// E302: Required config value is missing
    ConfigMissingRequired,

    // ========================================
    // Update errors (4xx)
    // ========================================
    /// E401: Upstream reference could not be resolved
    UpstreamUnresolved,
    /// E402: Backup could not be created or restored
    BackupFailed,

    // ========================================
    // Distribution errors (5xx)
    // ========================================
    /// E501: Remote repository operation failed
    DistributionFailed,
    /// E502: Local or remote rate limit exhausted
    RateLimited,
    /// E503: Remote operation exceeded its time budget
    Timeout,
    /// E504: Host CLI tool missing or not authenticated
    HostUnavailable,
    /// E505: Local repository operation failed
    GitError,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Filesystem read or write failed
    IoError,
    /// E602: Failed to serialize/deserialize data
    SerializationError,

    // ========================================
    // Validation errors (8xx)
    // ========================================
    /// E801: Input validation failed
    ValidationFailed,
    /// E802: Output directory is a symlink or a protected system path
    UnsafeOutputPath,

    // ========================================
    // Lookup errors (9xx)
    // ========================================
    /// E902: Requested resource not found
    NotFound,
}

impl ErrorCode {
    /// Get the numeric code (e.g., 103 for `ManifestMissing`).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::ManifestMissing => 103,
            Self::ManifestInvalid => 104,

            Self::PackagingFailed => 201,
            Self::UnknownFormat => 202,
            Self::ChecksumMismatch => 203,

            Self::ConfigInvalid => 301,
            Self::ConfigMissingRequired => 302,

            Self::UpstreamUnresolved => 401,
            Self::BackupFailed => 402,

            Self::DistributionFailed => 501,
            Self::RateLimited => 502,
            Self::Timeout => 503,
            Self::HostUnavailable => 504,
            Self::GitError => 505,

            Self::IoError => 601,
            Self::SerializationError => 602,

            Self::ValidationFailed => 801,
            Self::UnsafeOutputPath => 802,

            Self::NotFound => 902,
        }
    }

    /// Get the error code string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Default recovery suggestion for this code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::ManifestMissing => {
                "The directory or archive is not an assembled bundle; run `abg assemble` first"
            }
            Self::ManifestInvalid => {
                "manifest.json is damaged; restore it from a backup or re-assemble the bundle"
            }
            Self::PackagingFailed => {
                "Check disk space and permissions for the output directory, then retry"
            }
            Self::UnknownFormat => "Use one of: tar-gz, zip, directory, agentpkg",
            Self::ChecksumMismatch => {
                "The package was modified or corrupted; download or rebuild it and retry"
            }
            Self::ConfigInvalid => "Fix the config file syntax; run `abg config` to see active values",
            Self::ConfigMissingRequired => "Set the missing value in config.toml or via ABG_* env",
            Self::UpstreamUnresolved => {
                "Pass --upstream-dir or --repository so the bundle has something to compare against"
            }
            Self::BackupFailed => "Free disk space next to the bundle directory or pass --no-backup",
            Self::DistributionFailed => {
                "Check `gh auth status` and repository permissions, then retry the same command"
            }
            Self::RateLimited => "Wait for the rate limit window to reset, then retry",
            Self::Timeout => "The host was slow to respond; retry, or raise the matching ABG_TIMEOUT_* value",
            Self::HostUnavailable => "Install the GitHub CLI (`gh`) and git, then run `gh auth login`",
            Self::GitError => {
                "The staging checkout is in a bad state; rerun the command to start from a fresh clone"
            }
            Self::IoError => "Check that the path exists and that you have read/write permission",
            Self::SerializationError => "The file may be truncated or hand-edited incorrectly",
            Self::ValidationFailed => "Review the input values and correct the reported problem",
            Self::UnsafeOutputPath => {
                "Choose a regular directory that is not a symlink and not under a system root"
            }
            Self::NotFound => "Check the name or path and try again",
        }
    }

    /// Whether the user can plausibly fix this and retry.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SerializationError)
    }

    /// Category derived from the hundreds digit.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "bundle",
            2 => "packaging",
            3 => "config",
            4 => "update",
            5 => "distribution",
            6 => "storage",
            8 => "validation",
            9 => "lookup",
            _ => "unknown",
        }
    }

    /// Iterate over every code.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::ManifestMissing,
            Self::ManifestInvalid,
            Self::PackagingFailed,
            Self::UnknownFormat,
            Self::ChecksumMismatch,
            Self::ConfigInvalid,
            Self::ConfigMissingRequired,
            Self::UpstreamUnresolved,
            Self::BackupFailed,
            Self::DistributionFailed,
            Self::RateLimited,
            Self::Timeout,
            Self::HostUnavailable,
            Self::GitError,
            Self::IoError,
            Self::SerializationError,
            Self::ValidationFailed,
            Self::UnsafeOutputPath,
            Self::NotFound,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}
