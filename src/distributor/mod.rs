//! Publishing packaged bundles to a remote repository host.
//!
//! [`Distributor::distribute`] is a five-step state machine: quota check,
//! repository resolution, content upload, optional release, result. Every
//! remote failure is folded into a failed [`DistributionResult`]; only local
//! preconditions (missing package, malformed repository name) raise.
//!
//! Each host step tolerates "already exists" and "nothing to commit", so a
//! caller can retry a failed distribution without cleaning anything up.

pub mod github;
pub mod host;
pub mod process;
pub mod quota;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bundler::package::{PackageFormat, PackagedBundle, extract_tree};
use crate::bundler::templates;
use crate::config::DistributionConfig;
use crate::error::{AbgError, Result, StructuredError};
use crate::utils::fs::{copy_dir_all, write_file};

pub use github::GhCliHost;
pub use host::{
    CommitOutcome, CreateOutcome, CreateRepository, ReleaseInfo, ReleaseOutcome, ReleaseRequest,
    RepoExistence, RepositoryHost, RepositorySummary,
};
pub use quota::QuotaBucket;

/// Prefix shared by every repository this tool creates.
pub const REPOSITORY_PREFIX: &str = "agent-bundle";

/// Per-call knobs for [`Distributor::distribute`].
#[derive(Debug, Clone, Default)]
pub struct DistributeOptions {
    /// Overrides the configured visibility for a newly created repository.
    pub public: Option<bool>,
    pub description: Option<String>,
    /// Overrides the configured default branch.
    pub branch: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
}

/// Outcome of one distribution attempt. Never an `Err` for remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionResult {
    pub success: bool,
    pub platform: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl DistributionResult {
    fn pending(platform: &str, repository: &str, branch: &str) -> Self {
        Self {
            success: false,
            platform: platform.to_string(),
            repository: repository.to_string(),
            url: None,
            branch: branch.to_string(),
            commit_sha: None,
            release_tag: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            error: None,
            retry_after_seconds: None,
        }
    }

    fn fail(&mut self, err: &AbgError) {
        self.success = false;
        self.errors.push(err.to_string());
        self.retry_after_seconds = err.retry_after_seconds();
        self.error = Some(err.to_structured());
    }
}

/// Drives a [`RepositoryHost`] through the distribution steps.
///
/// The quota bucket sits behind a mutex so one distributor can be shared
/// across threads; the host itself decides its own thread safety.
#[derive(Debug)]
pub struct Distributor<H> {
    host: H,
    config: DistributionConfig,
    quota: Mutex<QuotaBucket>,
}

impl<H: RepositoryHost> Distributor<H> {
    pub fn new(host: H, config: DistributionConfig) -> Self {
        let quota = QuotaBucket::new(config.quota_limit, config.quota_window_seconds, Utc::now());
        Self {
            host,
            config,
            quota: Mutex::new(quota),
        }
    }

    #[must_use]
    pub fn with_quota(self, quota: QuotaBucket) -> Self {
        Self {
            quota: Mutex::new(quota),
            ..self
        }
    }

    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Snapshot of the current quota state.
    pub fn quota(&self) -> QuotaBucket {
        *self.quota.lock()
    }

    /// Publish `package` to `repository` (default `agent-bundle-<name>`).
    pub fn distribute(
        &self,
        package: &PackagedBundle,
        repository: Option<&str>,
        create_release: bool,
        options: &DistributeOptions,
    ) -> Result<DistributionResult> {
        if !package.path.exists() {
            return Err(AbgError::NotFound(format!(
                "package {} does not exist",
                package.path.display()
            )));
        }
        let repository = repository.map_or_else(|| package.default_repository(), str::to_string);
        validate_repository_name(&repository)?;
        let branch = options
            .branch
            .clone()
            .unwrap_or_else(|| self.config.default_branch.clone());

        let mut result = DistributionResult::pending(self.host.name(), &repository, &branch);

        if let Err(err) = self.acquire("distribute") {
            warn!(repository = %repository, error = %err, "distribution blocked by local quota");
            result.fail(&err);
            return Ok(result);
        }

        match self.run_steps(package, &repository, &branch, create_release, options, &mut result) {
            Ok(()) => {
                result.success = true;
                info!(
                    repository = %repository,
                    commit = result.commit_sha.as_deref().unwrap_or_default(),
                    release = result.release_tag.as_deref().unwrap_or_default(),
                    "distributed bundle"
                );
            }
            Err(err) => {
                self.note_remote_limit(&err);
                warn!(repository = %repository, error = %err, "distribution failed");
                result.fail(&err);
            }
        }
        Ok(result)
    }

    fn run_steps(
        &self,
        package: &PackagedBundle,
        repository: &str,
        branch: &str,
        create_release: bool,
        options: &DistributeOptions,
        result: &mut DistributionResult,
    ) -> Result<()> {
        self.resolve_repository(package, repository, branch, options)?;
        result.url = Some(self.host.repository_url(repository)?);

        let sha = self.upload(package, repository, branch)?;
        result.commit_sha = Some(sha);

        if create_release {
            match self.release(package, repository, options) {
                Ok(outcome) => result.release_tag = Some(outcome.tag().to_string()),
                Err(err) => {
                    self.note_remote_limit(&err);
                    warn!(repository, error = %err, "release failed after push");
                    result.warnings.push(format!("release not created: {err}"));
                }
            }
        }
        Ok(())
    }

    fn resolve_repository(
        &self,
        package: &PackagedBundle,
        repository: &str,
        branch: &str,
        options: &DistributeOptions,
    ) -> Result<()> {
        let existence = self.host.repository_exists(repository)?;
        debug!(repository, ?existence, "repository lookup");
        if existence == RepoExistence::Exists {
            return Ok(());
        }
        let request = CreateRepository {
            name: repository.to_string(),
            description: options
                .description
                .clone()
                .unwrap_or_else(|| package.bundle.description.clone()),
            public: options.public.unwrap_or(self.config.public),
            default_branch: branch.to_string(),
        };
        match self.host.create_repository(&request)? {
            CreateOutcome::Created => info!(repository, "repository created"),
            CreateOutcome::AlreadyExists => debug!(repository, "repository already exists"),
        }
        Ok(())
    }

    fn upload(&self, package: &PackagedBundle, repository: &str, branch: &str) -> Result<String> {
        let scratch = tempfile::tempdir()?;
        let workdir = scratch.path().join("repo");
        self.host.clone_or_init(repository, &workdir, branch)?;

        clear_working_copy(&workdir)?;
        stage_package(package, &workdir, scratch.path())?;

        let readme = workdir.join("README.md");
        if !readme.is_file() {
            let owner = repository
                .split_once('/')
                .map(|(owner, _)| owner)
                .or(self.config.github_org.as_deref());
            write_file(&readme, templates::repository_readme(package, owner))?;
        }

        let message = format!("Add {} v{}", package.bundle.name, package.bundle.version);
        let outcome = self.host.commit(&workdir, &message)?;
        if let CommitOutcome::NothingToCommit(sha) = &outcome {
            debug!(repository, sha, "working copy unchanged");
        }
        self.host.push(&workdir, branch)?;
        Ok(outcome.sha().to_string())
    }

    fn release(
        &self,
        package: &PackagedBundle,
        repository: &str,
        options: &DistributeOptions,
    ) -> Result<ReleaseOutcome> {
        let request = ReleaseRequest {
            tag: format!("v{}", package.bundle.version),
            title: format!("{} v{}", package.bundle.name, package.bundle.version),
            notes: templates::release_notes(package),
            asset: package.path.is_file().then(|| package.path.clone()),
            draft: options.draft,
            prerelease: options.prerelease,
        };
        self.host.create_release(repository, &request)
    }

    /// Repositories under `owner` whose name marks them as bundle distributions.
    pub fn list_distributions(&self, owner: Option<&str>) -> Result<Vec<RepositorySummary>> {
        self.acquire("list repositories")?;
        let repos = self
            .host
            .list_repositories(owner)
            .inspect_err(|err| self.note_remote_limit(err))?;
        Ok(repos
            .into_iter()
            .filter(|repo| repo.name.starts_with(REPOSITORY_PREFIX))
            .collect())
    }

    pub fn list_releases(&self, repository: &str) -> Result<Vec<ReleaseInfo>> {
        validate_repository_name(repository)?;
        self.acquire("list releases")?;
        self.host
            .list_releases(repository)
            .inspect_err(|err| self.note_remote_limit(err))
    }

    /// Download the release artifact of `version` (latest when `None`)
    /// into `target_dir` and return its path.
    pub fn download_distribution(
        &self,
        repository: &str,
        target_dir: &Path,
        version: Option<&str>,
    ) -> Result<PathBuf> {
        validate_repository_name(repository)?;
        self.acquire("download release")?;
        let tag = version.map(|v| {
            if v.starts_with('v') {
                v.to_string()
            } else {
                format!("v{v}")
            }
        });
        let files = self
            .host
            .download_asset(repository, tag.as_deref(), target_dir)
            .inspect_err(|err| self.note_remote_limit(err))?;
        pick_artifact(files).ok_or_else(|| {
            AbgError::NotFound(format!(
                "release {} of {repository} has no bundle artifact",
                tag.as_deref().unwrap_or("latest")
            ))
        })
    }

    fn acquire(&self, endpoint: &str) -> Result<()> {
        self.quota.lock().try_acquire(Utc::now(), endpoint)
    }

    /// Drain the local bucket when the host itself reported a limit.
    fn note_remote_limit(&self, err: &AbgError) {
        if let AbgError::RateLimit {
            retry_after_seconds, ..
        } = err
        {
            let secs = i64::try_from(*retry_after_seconds).unwrap_or(i64::MAX / 1000);
            let reset_at = Utc::now() + Duration::seconds(secs.min(86_400 * 366));
            self.quota.lock().exhaust_until(reset_at);
        }
    }
}

/// `name` or `owner/name`, using only characters hosts accept.
pub fn validate_repository_name(repository: &str) -> Result<()> {
    let parts: Vec<&str> = repository.split('/').collect();
    let valid_part = |part: &str| {
        !part.is_empty()
            && part != "."
            && part != ".."
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if parts.len() > 2 || !parts.iter().all(|part| valid_part(part)) {
        return Err(AbgError::Validation(format!(
            "invalid repository name '{repository}'"
        )));
    }
    Ok(())
}

/// Remove everything but `.git` so files dropped from the bundle disappear.
fn clear_working_copy(workdir: &Path) -> Result<()> {
    for entry in fs::read_dir(workdir)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Copy the packaged tree, unpacking archives first, into `workdir`.
fn stage_package(package: &PackagedBundle, workdir: &Path, scratch: &Path) -> Result<()> {
    if package.format == PackageFormat::Directory {
        return copy_dir_all(&package.path, workdir);
    }
    let staging = scratch.join("extract");
    let extracted = extract_tree(&package.path, &staging, true)?;
    copy_dir_all(&extracted.root, workdir)
}

fn pick_artifact(files: Vec<PathBuf>) -> Option<PathBuf> {
    let is_bundle = |path: &PathBuf| PackageFormat::detect(path).is_ok_and(PackageFormat::is_archive);
    let mut files = files;
    files.sort();
    match files.iter().position(is_bundle) {
        Some(index) => Some(files.swap_remove(index)),
        None => files.into_iter().next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::package::{PackageOptions, Packager};
    use crate::error::ErrorCode;
    use crate::test_utils::{MemoryHost, demo_bundle};
    use tempfile::TempDir;

    fn packaged(temp: &TempDir, format: PackageFormat) -> PackagedBundle {
        Packager::new(temp.path().join("out"))
            .unwrap()
            .package(&demo_bundle(), format, PackageOptions::default())
            .unwrap()
    }

    #[test]
    fn repository_name_validation() {
        assert!(validate_repository_name("agent-bundle-demo").is_ok());
        assert!(validate_repository_name("acme/agent-bundle-demo").is_ok());
        assert!(validate_repository_name("").is_err());
        assert!(validate_repository_name("a/b/c").is_err());
        assert!(validate_repository_name("../etc").is_err());
        assert!(validate_repository_name("has space").is_err());
    }

    #[test]
    fn distribute_creates_repository_and_release() {
        let temp = TempDir::new().unwrap();
        let package = packaged(&temp, PackageFormat::TarGz);
        let distributor = Distributor::new(MemoryHost::new(), DistributionConfig::default());

        let result = distributor
            .distribute(&package, None, true, &DistributeOptions::default())
            .unwrap();
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.repository, "agent-bundle-demo_bundle");
        assert_eq!(result.release_tag.as_deref(), Some("v1.0.0"));
        assert!(result.commit_sha.is_some());

        let host = distributor.host();
        let files = host.files("agent-bundle-demo_bundle");
        assert!(files.contains_key("agents/echo_agent.md"));
        assert!(files.contains_key("manifest.json"));
        assert!(files.contains_key("README.md"));
        assert_eq!(host.release_assets("agent-bundle-demo_bundle", "v1.0.0").len(), 1);
    }

    #[test]
    fn missing_package_raises_before_any_call() {
        let temp = TempDir::new().unwrap();
        let mut package = packaged(&temp, PackageFormat::Zip);
        package.path = temp.path().join("gone.zip");
        let distributor = Distributor::new(MemoryHost::new(), DistributionConfig::default());

        let err = distributor
            .distribute(&package, None, false, &DistributeOptions::default())
            .unwrap_err();
        assert!(matches!(err, AbgError::NotFound(_)));
        assert_eq!(distributor.host().call_count(), 0);
    }

    #[test]
    fn remote_failure_is_reported_not_raised() {
        let temp = TempDir::new().unwrap();
        let package = packaged(&temp, PackageFormat::Directory);
        let host = MemoryHost::new();
        host.fail_push("remote: permission denied");
        let distributor = Distributor::new(host, DistributionConfig::default());

        let result = distributor
            .distribute(&package, None, true, &DistributeOptions::default())
            .unwrap();
        assert!(!result.success);
        assert!(result.errors[0].contains("permission denied"));
        assert!(result.release_tag.is_none());
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::DistributionFailed);
        assert!(!error.suggestion.is_empty());
    }

    #[test]
    fn release_failure_is_a_warning() {
        let temp = TempDir::new().unwrap();
        let package = packaged(&temp, PackageFormat::TarGz);
        let host = MemoryHost::new();
        host.fail_release("HTTP 502");
        let distributor = Distributor::new(host, DistributionConfig::default());

        let result = distributor
            .distribute(&package, None, true, &DistributeOptions::default())
            .unwrap();
        assert!(result.success);
        assert!(result.release_tag.is_none());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn remote_rate_limit_drains_local_quota() {
        let temp = TempDir::new().unwrap();
        let package = packaged(&temp, PackageFormat::TarGz);
        let host = MemoryHost::new();
        host.rate_limit_pushes(120);
        let distributor = Distributor::new(host, DistributionConfig::default());

        let result = distributor
            .distribute(&package, None, false, &DistributeOptions::default())
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.retry_after_seconds, Some(120));
        assert_eq!(distributor.quota().remaining, 0);
    }

    #[test]
    fn list_distributions_filters_prefix() {
        let host = MemoryHost::new();
        host.add_repository("agent-bundle-one");
        host.add_repository("unrelated");
        let distributor = Distributor::new(host, DistributionConfig::default());
        let repos = distributor.list_distributions(None).unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "agent-bundle-one");
    }

    #[test]
    fn pick_artifact_prefers_archives() {
        let files = vec![PathBuf::from("/d/notes.txt"), PathBuf::from("/d/b-1.0.0.zip")];
        assert_eq!(pick_artifact(files), Some(PathBuf::from("/d/b-1.0.0.zip")));
        assert_eq!(pick_artifact(Vec::new()), None);
    }
}
