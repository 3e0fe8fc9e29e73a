//! GitHub host: `gh` for the API, `git` for network transfers under a
//! deadline, and libgit2 for the staging checkout itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use git2::{Commit, IndexAddOption, Repository, RepositoryInitOptions, Signature};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use super::host::{
    CommitOutcome, CreateOutcome, CreateRepository, ReleaseInfo, ReleaseOutcome, ReleaseRequest,
    RepoExistence, RepositoryHost, RepositorySummary,
};
use super::process::{CommandOutput, run};
use crate::config::{DistributionConfig, TimeoutConfig};
use crate::error::{AbgError, Result};

const PLATFORM: &str = "github";

/// Used when the host reports a rate limit without saying when it resets.
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

#[derive(Debug)]
pub struct GhCliHost {
    gh: String,
    git: String,
    owner: Mutex<Option<String>>,
    timeouts: TimeoutConfig,
    author: Option<(String, String)>,
}

impl GhCliHost {
    #[must_use]
    pub fn new(config: &DistributionConfig, timeouts: TimeoutConfig) -> Self {
        let author = match (&config.commit_author, &config.commit_email) {
            (Some(name), Some(email)) => Some((name.clone(), email.clone())),
            _ => None,
        };
        Self {
            gh: config.gh_bin.clone(),
            git: config.git_bin.clone(),
            owner: Mutex::new(config.github_org.clone()),
            timeouts,
            author,
        }
    }

    /// Fail early with [`AbgError::HostUnavailable`] when a tool is missing.
    pub fn check_available(&self) -> Result<()> {
        for tool in [&self.gh, &self.git] {
            which::which(tool).map_err(|_| {
                AbgError::HostUnavailable(format!("'{tool}' is not installed or not on PATH"))
            })?;
        }
        Ok(())
    }

    /// Configured organization, or the authenticated login.
    pub fn owner(&self) -> Result<String> {
        if let Some(owner) = self.owner.lock().clone() {
            return Ok(owner);
        }
        let out = self.gh(&["api", "user", "--jq", ".login"], self.timeouts.metadata(), "resolve owner")?;
        let out = require(out, "", "resolve owner")?;
        let login = out.stdout.trim().to_string();
        if login.is_empty() {
            return Err(AbgError::Distribution {
                platform: PLATFORM.to_string(),
                repository: String::new(),
                message: "could not determine the authenticated account; run `gh auth login`".to_string(),
            });
        }
        *self.owner.lock() = Some(login.clone());
        Ok(login)
    }

    fn full_name(&self, repository: &str) -> Result<String> {
        if repository.contains('/') {
            return Ok(repository.to_string());
        }
        Ok(format!("{}/{repository}", self.owner()?))
    }

    fn gh(&self, args: &[&str], timeout: Duration, operation: &str) -> Result<CommandOutput> {
        run(&self.gh, args, None, timeout, operation)
    }

    fn git(&self, args: &[&str], cwd: &Path, timeout: Duration, operation: &str) -> Result<CommandOutput> {
        run(&self.git, args, Some(cwd), timeout, operation)
    }
}

impl GhCliHost {
    /// Configured author, else the user's git identity, else a fixed fallback.
    fn signature(&self, repo: &Repository) -> Result<Signature<'static>> {
        let signature = match &self.author {
            Some((name, email)) => Signature::now(name, email),
            None => repo
                .signature()
                .or_else(|_| Signature::now("abg", "abg@localhost")),
        };
        Ok(signature?)
    }
}

/// Fresh repository at `dest` whose unborn HEAD points at `branch`.
fn init_checkout(dest: &Path, branch: &str, url: &str) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let mut options = RepositoryInitOptions::new();
    options.initial_head(branch);
    let repo = Repository::init_opts(dest, &options)?;
    repo.remote("origin", url)?;
    Ok(())
}

/// HEAD commit, or `None` on an unborn branch.
fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(err)
            if matches!(
                err.code(),
                git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound
            ) =>
        {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Turn a failed command into the matching error kind.
fn require(out: CommandOutput, repository: &str, operation: &str) -> Result<CommandOutput> {
    if out.success {
        return Ok(out);
    }
    Err(classify_failure(&out, repository, operation))
}

fn classify_failure(out: &CommandOutput, repository: &str, operation: &str) -> AbgError {
    if is_rate_limited(out) {
        return AbgError::RateLimit {
            retry_after_seconds: DEFAULT_RATE_LIMIT_WAIT_SECS,
            endpoint: operation.to_string(),
        };
    }
    AbgError::Distribution {
        platform: PLATFORM.to_string(),
        repository: repository.to_string(),
        message: format!("{operation} failed: {}", out.diagnostic()),
    }
}

fn is_rate_limited(out: &CommandOutput) -> bool {
    out.mentions("rate limit") || out.mentions("secondary rate")
}

impl RepositoryHost for GhCliHost {
    fn name(&self) -> &str {
        PLATFORM
    }

    fn repository_exists(&self, repository: &str) -> Result<RepoExistence> {
        let full = self.full_name(repository)?;
        let out = self.gh(
            &["repo", "view", &full, "--json", "name"],
            self.timeouts.metadata(),
            "repository lookup",
        )?;
        if out.success {
            return Ok(RepoExistence::Exists);
        }
        if is_rate_limited(&out) {
            return Err(classify_failure(&out, &full, "repository lookup"));
        }
        if out.mentions("could not resolve") || out.mentions("not found") {
            return Ok(RepoExistence::NotFound);
        }
        debug!(repository = %full, stderr = %out.diagnostic(), "repository existence unknown");
        Ok(RepoExistence::Unknown)
    }

    fn create_repository(&self, request: &CreateRepository) -> Result<CreateOutcome> {
        let full = self.full_name(&request.name)?;
        let visibility = if request.public { "--public" } else { "--private" };
        let out = self.gh(
            &["repo", "create", &full, visibility, "--description", &request.description],
            self.timeouts.create(),
            "repository create",
        )?;
        if !out.success && out.mentions("already exists") {
            return Ok(CreateOutcome::AlreadyExists);
        }
        require(out, &full, "repository create")?;
        info!(repository = %full, public = request.public, "created repository");
        Ok(CreateOutcome::Created)
    }

    fn repository_url(&self, repository: &str) -> Result<String> {
        Ok(format!("https://github.com/{}", self.full_name(repository)?))
    }

    fn clone_or_init(&self, repository: &str, dest: &Path, branch: &str) -> Result<()> {
        let full = self.full_name(repository)?;
        let url = format!("https://github.com/{full}.git");
        let parent = dest.parent().unwrap_or(dest);
        let dest_str = dest.to_string_lossy();

        let cloned = self.git(
            &["clone", "--quiet", &url, &dest_str],
            parent,
            self.timeouts.repo_clone(),
            "clone",
        )?;
        if cloned.success && dest.join(".git").is_dir() {
            let repo = Repository::open(dest)?;
            // An empty remote clones without a branch.
            if head_commit(&repo)?.is_none() {
                repo.set_head(&format!("refs/heads/{branch}"))?;
            }
            return Ok(());
        }
        if is_rate_limited(&cloned) {
            return Err(classify_failure(&cloned, &full, "clone"));
        }

        debug!(repository = %full, stderr = %cloned.diagnostic(), "clone failed, initializing");
        init_checkout(dest, branch, &url)
    }

    fn commit(&self, workdir: &Path, message: &str) -> Result<CommitOutcome> {
        let repo = Repository::open(workdir)?;
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = head_commit(&repo)?;
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                return Ok(CommitOutcome::NothingToCommit(parent.id().to_string()));
            }
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = self.signature(&repo)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        debug!(commit = %oid, "committed staging checkout");
        Ok(CommitOutcome::Committed(oid.to_string()))
    }

    fn push(&self, workdir: &Path, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:{branch}");
        let out = self.git(&["push", "--quiet", "-u", "origin", &refspec], workdir, self.timeouts.push(), "push")?;
        require(out, "", "push")?;
        Ok(())
    }

    fn create_release(&self, repository: &str, request: &ReleaseRequest) -> Result<ReleaseOutcome> {
        let full = self.full_name(repository)?;
        let mut args: Vec<String> = vec![
            "release".into(),
            "create".into(),
            request.tag.clone(),
            "--repo".into(),
            full.clone(),
            "--title".into(),
            request.title.clone(),
            "--notes".into(),
            request.notes.clone(),
        ];
        if request.draft {
            args.push("--draft".into());
        }
        if request.prerelease {
            args.push("--prerelease".into());
        }
        if let Some(asset) = &request.asset {
            args.push(asset.to_string_lossy().into_owned());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.gh(&args, self.timeouts.release(), "release create")?;
        if !out.success && out.mentions("already exists") {
            return Ok(ReleaseOutcome::AlreadyExists(request.tag.clone()));
        }
        require(out, &full, "release create")?;
        info!(repository = %full, tag = %request.tag, "created release");
        Ok(ReleaseOutcome::Created(request.tag.clone()))
    }

    fn list_releases(&self, repository: &str) -> Result<Vec<ReleaseInfo>> {
        let full = self.full_name(repository)?;
        let endpoint = format!("repos/{full}/releases");
        let out = self.gh(&["api", &endpoint], self.timeouts.metadata(), "release list")?;
        let out = require(out, &full, "release list")?;
        parse_releases(&out.stdout)
    }

    fn download_asset(&self, repository: &str, tag: Option<&str>, dest: &Path) -> Result<Vec<PathBuf>> {
        let full = self.full_name(repository)?;
        std::fs::create_dir_all(dest)?;
        let before = list_files(dest)?;
        let dest_str = dest.to_string_lossy();
        let mut args = vec!["release", "download"];
        if let Some(tag) = tag {
            args.push(tag);
        }
        args.extend(["--repo", full.as_str(), "--dir", &*dest_str, "--clobber"]);
        let out = self.gh(&args, self.timeouts.download(), "release download")?;
        require(out, &full, "release download")?;
        let downloaded: Vec<PathBuf> = list_files(dest)?
            .into_iter()
            .filter(|path| !before.contains(path))
            .collect();
        if downloaded.is_empty() {
            return Ok(before);
        }
        Ok(downloaded)
    }

    fn list_repositories(&self, owner: Option<&str>) -> Result<Vec<RepositorySummary>> {
        let mut args = vec!["repo", "list"];
        if let Some(owner) = owner {
            args.push(owner);
        }
        args.extend(["--limit", "200", "--json", "name,description,url,updatedAt"]);
        let out = self.gh(&args, self.timeouts.metadata(), "repository list")?;
        let out = require(out, owner.unwrap_or_default(), "repository list")?;
        parse_repositories(&out.stdout)
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

fn parse_releases(raw: &str) -> Result<Vec<ReleaseInfo>> {
    let releases: Vec<ApiRelease> = serde_json::from_str(raw)?;
    Ok(releases
        .into_iter()
        .map(|release| ReleaseInfo {
            tag: release.tag_name,
            name: release.name.unwrap_or_default(),
            notes: release.body.unwrap_or_default(),
            prerelease: release.prerelease,
            published_at: release.published_at,
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliRepository {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn parse_repositories(raw: &str) -> Result<Vec<RepositorySummary>> {
    let repos: Vec<CliRepository> = serde_json::from_str(raw)?;
    Ok(repos
        .into_iter()
        .map(|repo| RepositorySummary {
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            url: repo.url,
            updated_at: repo.updated_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn parse_releases_maps_api_fields() {
        let raw = r#"[
            {"tag_name":"v1.1.0","name":"demo v1.1.0","body":"notes","prerelease":false,
             "published_at":"2026-01-02T03:04:05Z","assets":[]},
            {"tag_name":"v1.0.0","name":null,"body":null,"prerelease":true}
        ]"#;
        let releases = parse_releases(raw).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].tag, "v1.1.0");
        assert_eq!(releases[0].notes, "notes");
        assert!(releases[0].published_at.is_some());
        assert_eq!(releases[1].name, "");
        assert!(releases[1].prerelease);
    }

    #[test]
    fn parse_repositories_maps_cli_fields() {
        let raw = r#"[{"name":"agent-bundle-demo","description":"Echo","url":"https://github.com/o/agent-bundle-demo","updatedAt":"2026-03-01T00:00:00Z"}]"#;
        let repos = parse_repositories(raw).unwrap();
        assert_eq!(repos[0].name, "agent-bundle-demo");
        assert_eq!(repos[0].description, "Echo");
        assert!(repos[0].updated_at.is_some());
    }

    #[test]
    fn rate_limit_output_is_classified() {
        let err = classify_failure(&failed("API rate limit exceeded for user"), "o/r", "push");
        assert!(matches!(err, AbgError::RateLimit { retry_after_seconds, .. } if retry_after_seconds > 0));
    }

    #[test]
    fn generic_failure_is_distribution_error() {
        let err = classify_failure(&failed("permission denied"), "o/r", "push");
        match err {
            AbgError::Distribution { repository, message, .. } => {
                assert_eq!(repository, "o/r");
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn configured_org_is_used_without_lookup() {
        let config = DistributionConfig {
            github_org: Some("acme".to_string()),
            gh_bin: "abg-missing-gh".to_string(),
            ..DistributionConfig::default()
        };
        let host = GhCliHost::new(&config, TimeoutConfig::default());
        assert_eq!(host.full_name("agent-bundle-demo").unwrap(), "acme/agent-bundle-demo");
        assert_eq!(host.full_name("other/repo").unwrap(), "other/repo");
        assert_eq!(
            host.repository_url("agent-bundle-demo").unwrap(),
            "https://github.com/acme/agent-bundle-demo"
        );
    }

    #[test]
    fn fresh_checkout_starts_on_requested_branch() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("stage");
        init_checkout(&dest, "release", "https://github.com/acme/demo.git").unwrap();

        let repo = Repository::open(&dest).unwrap();
        assert!(head_commit(&repo).unwrap().is_none());
        let head = repo.find_reference("HEAD").unwrap();
        assert_eq!(head.symbolic_target(), Some("refs/heads/release"));
        let origin = repo.find_remote("origin").unwrap();
        assert_eq!(origin.url(), Some("https://github.com/acme/demo.git"));
    }

    #[test]
    fn commit_stages_everything_and_detects_no_change() {
        let temp = tempfile::tempdir().unwrap();
        init_checkout(temp.path(), "main", "https://github.com/acme/demo.git").unwrap();
        std::fs::write(temp.path().join("README.md"), "# demo\n").unwrap();
        std::fs::create_dir_all(temp.path().join("agents")).unwrap();
        std::fs::write(temp.path().join("agents/echo.md"), "echo").unwrap();

        let config = DistributionConfig {
            commit_author: Some("Release Bot".to_string()),
            commit_email: Some("bot@example.com".to_string()),
            ..DistributionConfig::default()
        };
        let host = GhCliHost::new(&config, TimeoutConfig::default());

        let CommitOutcome::Committed(first) = host.commit(temp.path(), "Release v1.0.0").unwrap() else {
            panic!("expected a new commit");
        };
        let repo = Repository::open(temp.path()).unwrap();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(commit.id().to_string(), first);
        assert_eq!(commit.author().name(), Some("Release Bot"));
        assert!(commit.tree().unwrap().get_path(Path::new("agents/echo.md")).is_ok());

        assert_eq!(
            host.commit(temp.path(), "Release v1.0.0").unwrap(),
            CommitOutcome::NothingToCommit(first.clone())
        );

        std::fs::remove_file(temp.path().join("agents/echo.md")).unwrap();
        let CommitOutcome::Committed(second) = host.commit(temp.path(), "Release v1.0.1").unwrap() else {
            panic!("expected a commit for the deletion");
        };
        assert_ne!(second, first);
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        assert!(commit.tree().unwrap().get_path(Path::new("agents/echo.md")).is_err());
        assert_eq!(commit.parent_count(), 1);
    }

    #[test]
    fn missing_tool_is_host_unavailable() {
        let config = DistributionConfig {
            gh_bin: "abg-missing-gh".to_string(),
            ..DistributionConfig::default()
        };
        let host = GhCliHost::new(&config, TimeoutConfig::default());
        assert!(matches!(host.check_available(), Err(AbgError::HostUnavailable(_))));
    }
}
