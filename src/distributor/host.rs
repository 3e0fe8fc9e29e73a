//! The command surface a repository host must offer.
//!
//! [`super::Distributor`] only talks to this trait, so the same state machine
//! drives the `gh`/`git` CLI host, an API client, or an in-memory fake.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Three-valued answer to "does this repository exist?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoExistence {
    Exists,
    NotFound,
    /// The host could not say (network, auth). Creation is still attempted
    /// and an "already exists" answer is tolerated.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRepository {
    pub name: String,
    pub description: String,
    pub public: bool,
    pub default_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(String),
    /// Working copy already matched `HEAD`, which is returned.
    NothingToCommit(String),
}

impl CommitOutcome {
    #[must_use]
    pub fn sha(&self) -> &str {
        match self {
            Self::Committed(sha) | Self::NothingToCommit(sha) => sha,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub tag: String,
    pub title: String,
    pub notes: String,
    /// Attached when the artifact is a single file.
    pub asset: Option<PathBuf>,
    pub draft: bool,
    pub prerelease: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Created(String),
    AlreadyExists(String),
}

impl ReleaseOutcome {
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Created(tag) | Self::AlreadyExists(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Remote repository host.
///
/// Every mutating call must be idempotent under re-invocation: creating an
/// existing repository or release reports `AlreadyExists`, committing an
/// unchanged tree reports `NothingToCommit`.
pub trait RepositoryHost {
    /// Platform label used in results and errors, e.g. `github`.
    fn name(&self) -> &str;

    fn repository_exists(&self, repository: &str) -> Result<RepoExistence>;

    fn create_repository(&self, request: &CreateRepository) -> Result<CreateOutcome>;

    /// Browsable URL of `repository`.
    fn repository_url(&self, repository: &str) -> Result<String>;

    /// Clone `repository` into `dest`, or initialize an empty working copy
    /// on `branch` wired to it when the remote has no commits.
    fn clone_or_init(&self, repository: &str, dest: &Path, branch: &str) -> Result<()>;

    /// Stage everything in `workdir` and commit.
    fn commit(&self, workdir: &Path, message: &str) -> Result<CommitOutcome>;

    fn push(&self, workdir: &Path, branch: &str) -> Result<()>;

    fn create_release(&self, repository: &str, request: &ReleaseRequest) -> Result<ReleaseOutcome>;

    /// Newest first.
    fn list_releases(&self, repository: &str) -> Result<Vec<ReleaseInfo>>;

    /// Download the assets of `tag` (latest release when `None`) into `dest`.
    fn download_asset(&self, repository: &str, tag: Option<&str>, dest: &Path) -> Result<Vec<PathBuf>>;

    /// Repositories owned by `owner`, or by the authenticated account.
    fn list_repositories(&self, owner: Option<&str>) -> Result<Vec<RepositorySummary>>;
}
