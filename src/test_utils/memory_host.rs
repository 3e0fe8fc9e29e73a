//! In-memory [`RepositoryHost`] for distribution and update tests.
//!
//! Repositories are maps of path to bytes. A working copy is a real
//! directory whose `.git/origin` names the repository it was cloned from;
//! `commit` snapshots it and `push` publishes the snapshot. Failures can be
//! injected per operation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::bundler::checksum::{hash_bytes, relative_slash_path};
use crate::distributor::host::{
    CommitOutcome, CreateOutcome, CreateRepository, ReleaseInfo, ReleaseOutcome, ReleaseRequest,
    RepoExistence, RepositoryHost, RepositorySummary,
};
use crate::error::{AbgError, Result};

type Snapshot = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct Repo {
    description: String,
    public: bool,
    commits: Vec<(String, Snapshot)>,
    releases: Vec<(ReleaseInfo, Vec<(String, Vec<u8>)>)>,
}

impl Repo {
    fn head(&self) -> Option<&(String, Snapshot)> {
        self.commits.last()
    }
}

#[derive(Debug, Default)]
struct State {
    repos: BTreeMap<String, Repo>,
    pending: HashMap<PathBuf, (String, String, Snapshot)>,
    calls: usize,
    push_failure: Option<String>,
    release_failure: Option<String>,
    push_rate_limit: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repository(&self, name: &str) {
        self.state.lock().repos.entry(name.to_string()).or_default();
    }

    /// Publish a release of `repository` carrying `asset` as its only file.
    pub fn publish_release(&self, repository: &str, tag: &str, notes: &str, asset: &Path) -> Result<()> {
        let bytes = fs::read(asset)?;
        let name = asset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut state = self.state.lock();
        let repo = state.repos.entry(repository.to_string()).or_default();
        repo.releases.push((
            ReleaseInfo {
                tag: tag.to_string(),
                name: tag.to_string(),
                notes: notes.to_string(),
                prerelease: false,
                published_at: Some(Utc::now()),
            },
            vec![(name, bytes)],
        ));
        Ok(())
    }

    pub fn fail_push(&self, message: &str) {
        self.state.lock().push_failure = Some(message.to_string());
    }

    pub fn fail_release(&self, message: &str) {
        self.state.lock().release_failure = Some(message.to_string());
    }

    /// Make every push report a host rate limit resetting in `seconds`.
    pub fn rate_limit_pushes(&self, seconds: u64) {
        self.state.lock().push_rate_limit = Some(seconds);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.push_failure = None;
        state.release_failure = None;
        state.push_rate_limit = None;
    }

    /// Number of trait calls made so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Files at the head of `repository`.
    pub fn files(&self, repository: &str) -> Snapshot {
        self.state
            .lock()
            .repos
            .get(repository)
            .and_then(Repo::head)
            .map(|(_, files)| files.clone())
            .unwrap_or_default()
    }

    pub fn commit_count(&self, repository: &str) -> usize {
        self.state
            .lock()
            .repos
            .get(repository)
            .map_or(0, |repo| repo.commits.len())
    }

    pub fn release_count(&self, repository: &str) -> usize {
        self.state
            .lock()
            .repos
            .get(repository)
            .map_or(0, |repo| repo.releases.len())
    }

    pub fn is_public(&self, repository: &str) -> Option<bool> {
        self.state.lock().repos.get(repository).map(|repo| repo.public)
    }

    /// Asset names attached to `tag`.
    pub fn release_assets(&self, repository: &str, tag: &str) -> Vec<String> {
        self.state
            .lock()
            .repos
            .get(repository)
            .and_then(|repo| repo.releases.iter().find(|(info, _)| info.tag == tag))
            .map(|(_, assets)| assets.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn tick(&self) {
        self.state.lock().calls += 1;
    }
}

fn host_error(repository: &str, message: impl Into<String>) -> AbgError {
    AbgError::Distribution {
        platform: "memory".to_string(),
        repository: repository.to_string(),
        message: message.into(),
    }
}

fn snapshot(dir: &Path) -> Result<Snapshot> {
    let mut files = Snapshot::new();
    for entry in WalkDir::new(dir).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|err| std::io::Error::other(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_slash_path(dir, entry.path())?;
        if rel.starts_with(".git/") {
            continue;
        }
        files.insert(rel, fs::read(entry.path())?);
    }
    Ok(files)
}

fn snapshot_sha(files: &Snapshot, parent: Option<&str>) -> String {
    let mut buf = parent.unwrap_or_default().as_bytes().to_vec();
    for (path, bytes) in files {
        buf.extend_from_slice(path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(bytes);
    }
    hash_bytes(&buf).hex()[..40].to_string()
}

impl RepositoryHost for MemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    fn repository_exists(&self, repository: &str) -> Result<RepoExistence> {
        self.tick();
        if self.state.lock().repos.contains_key(repository) {
            Ok(RepoExistence::Exists)
        } else {
            Ok(RepoExistence::NotFound)
        }
    }

    fn create_repository(&self, request: &CreateRepository) -> Result<CreateOutcome> {
        self.tick();
        let mut state = self.state.lock();
        if state.repos.contains_key(&request.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.repos.insert(
            request.name.clone(),
            Repo {
                description: request.description.clone(),
                public: request.public,
                ..Repo::default()
            },
        );
        Ok(CreateOutcome::Created)
    }

    fn repository_url(&self, repository: &str) -> Result<String> {
        self.tick();
        Ok(format!("memory://{repository}"))
    }

    fn clone_or_init(&self, repository: &str, dest: &Path, _branch: &str) -> Result<()> {
        self.tick();
        let files = {
            let state = self.state.lock();
            let repo = state
                .repos
                .get(repository)
                .ok_or_else(|| host_error(repository, "repository not found"))?;
            repo.head().map(|(_, files)| files.clone()).unwrap_or_default()
        };
        fs::create_dir_all(dest.join(".git"))?;
        fs::write(dest.join(".git/origin"), repository)?;
        for (rel, bytes) in files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)?;
        }
        Ok(())
    }

    fn commit(&self, workdir: &Path, _message: &str) -> Result<CommitOutcome> {
        self.tick();
        let repository = fs::read_to_string(workdir.join(".git/origin"))?;
        let files = snapshot(workdir)?;
        let mut state = self.state.lock();
        let head = state
            .repos
            .get(&repository)
            .and_then(Repo::head)
            .map(|(sha, files)| (sha.clone(), files.clone()));
        if let Some((sha, head_files)) = &head {
            if head_files == &files {
                return Ok(CommitOutcome::NothingToCommit(sha.clone()));
            }
        }
        let sha = snapshot_sha(&files, head.as_ref().map(|(sha, _)| sha.as_str()));
        state
            .pending
            .insert(workdir.to_path_buf(), (repository, sha.clone(), files));
        Ok(CommitOutcome::Committed(sha))
    }

    fn push(&self, workdir: &Path, _branch: &str) -> Result<()> {
        self.tick();
        let mut state = self.state.lock();
        if let Some(seconds) = state.push_rate_limit {
            return Err(AbgError::RateLimit {
                retry_after_seconds: seconds,
                endpoint: "push".to_string(),
            });
        }
        if let Some(message) = state.push_failure.clone() {
            return Err(host_error("", message));
        }
        if let Some((repository, sha, files)) = state.pending.remove(workdir) {
            let repo = state
                .repos
                .get_mut(&repository)
                .ok_or_else(|| host_error(&repository, "repository not found"))?;
            repo.commits.push((sha, files));
        }
        Ok(())
    }

    fn create_release(&self, repository: &str, request: &ReleaseRequest) -> Result<ReleaseOutcome> {
        self.tick();
        let asset = match &request.asset {
            Some(path) => Some((
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                fs::read(path)?,
            )),
            None => None,
        };
        let mut state = self.state.lock();
        if let Some(message) = state.release_failure.clone() {
            return Err(host_error(repository, message));
        }
        let repo = state
            .repos
            .get_mut(repository)
            .ok_or_else(|| host_error(repository, "repository not found"))?;
        if repo.releases.iter().any(|(info, _)| info.tag == request.tag) {
            return Ok(ReleaseOutcome::AlreadyExists(request.tag.clone()));
        }
        repo.releases.push((
            ReleaseInfo {
                tag: request.tag.clone(),
                name: request.title.clone(),
                notes: request.notes.clone(),
                prerelease: request.prerelease,
                published_at: Some(Utc::now()),
            },
            asset.into_iter().collect(),
        ));
        Ok(ReleaseOutcome::Created(request.tag.clone()))
    }

    fn list_releases(&self, repository: &str) -> Result<Vec<ReleaseInfo>> {
        self.tick();
        let state = self.state.lock();
        let repo = state
            .repos
            .get(repository)
            .ok_or_else(|| host_error(repository, "repository not found"))?;
        Ok(repo.releases.iter().rev().map(|(info, _)| info.clone()).collect())
    }

    fn download_asset(&self, repository: &str, tag: Option<&str>, dest: &Path) -> Result<Vec<PathBuf>> {
        self.tick();
        let assets = {
            let state = self.state.lock();
            let repo = state
                .repos
                .get(repository)
                .ok_or_else(|| host_error(repository, "repository not found"))?;
            let release = match tag {
                Some(tag) => repo.releases.iter().find(|(info, _)| info.tag == tag),
                None => repo.releases.last(),
            };
            release
                .map(|(_, assets)| assets.clone())
                .ok_or_else(|| host_error(repository, "release not found"))?
        };
        fs::create_dir_all(dest)?;
        let mut paths = Vec::new();
        for (name, bytes) in assets {
            let path = dest.join(name);
            fs::write(&path, bytes)?;
            paths.push(path);
        }
        Ok(paths)
    }

    fn list_repositories(&self, _owner: Option<&str>) -> Result<Vec<RepositorySummary>> {
        self.tick();
        Ok(self
            .state
            .lock()
            .repos
            .iter()
            .map(|(name, repo)| RepositorySummary {
                name: name.clone(),
                description: repo.description.clone(),
                url: format!("memory://{name}"),
                updated_at: None,
            })
            .collect())
    }
}
