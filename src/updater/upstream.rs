//! Where newer versions of a bundle come from.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundler::manifest::Manifest;
use crate::bundler::package::{extract_tree, verify_tree};
use crate::distributor::{Distributor, RepositoryHost};
use crate::error::{AbgError, Result};
use crate::utils::fs::copy_dir_all;

/// Longest change summary returned by [`UpstreamSource::latest`].
const MAX_CHANGES: usize = 20;

/// Newest version an upstream offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRelease {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub changes: Vec<String>,
}

pub trait UpstreamSource {
    /// Human-readable origin, for logs and results.
    fn describe(&self) -> String;

    /// Resolve the newest version. Failure is [`AbgError::UpstreamUnresolved`].
    fn latest(&self) -> Result<UpstreamRelease>;

    /// Materialize `release` under `dest` and return the verified tree root.
    fn fetch(&self, release: &UpstreamRelease, dest: &Path) -> Result<PathBuf>;
}

impl<T: UpstreamSource + ?Sized> UpstreamSource for &T {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn latest(&self) -> Result<UpstreamRelease> {
        (**self).latest()
    }

    fn fetch(&self, release: &UpstreamRelease, dest: &Path) -> Result<PathBuf> {
        (**self).fetch(release, dest)
    }
}

/// An assembled tree on disk, typically a newer checkout of the same bundle.
#[derive(Debug, Clone)]
pub struct DirectoryUpstream {
    root: PathBuf,
}

impl DirectoryUpstream {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn manifest(&self) -> Result<Manifest> {
        Manifest::load_from_dir(&self.root).map_err(|err| {
            AbgError::UpstreamUnresolved(format!("{}: {err}", self.root.display()))
        })
    }
}

impl UpstreamSource for DirectoryUpstream {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn latest(&self) -> Result<UpstreamRelease> {
        let manifest = self.manifest()?;
        let version = parse_version(&manifest.bundle.version, &self.describe())?;
        let changes = manifest
            .metadata
            .get("changes")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .take(MAX_CHANGES)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(UpstreamRelease {
            version,
            tag: None,
            changes,
        })
    }

    fn fetch(&self, _release: &UpstreamRelease, dest: &Path) -> Result<PathBuf> {
        let manifest = self.manifest()?;
        verify_tree(&self.root, &manifest)?;
        let tree = dest.join("upstream");
        copy_dir_all(&self.root, &tree)?;
        Ok(tree)
    }
}

/// The newest semver-tagged release of a repository on the host.
#[derive(Debug)]
pub struct ReleaseUpstream<'a, H> {
    distributor: &'a Distributor<H>,
    repository: String,
}

impl<'a, H: RepositoryHost> ReleaseUpstream<'a, H> {
    pub fn new(distributor: &'a Distributor<H>, repository: impl Into<String>) -> Self {
        Self {
            distributor,
            repository: repository.into(),
        }
    }
}

impl<H: RepositoryHost> UpstreamSource for ReleaseUpstream<'_, H> {
    fn describe(&self) -> String {
        format!("{}:{}", self.distributor.host().name(), self.repository)
    }

    fn latest(&self) -> Result<UpstreamRelease> {
        let releases = self.distributor.list_releases(&self.repository).map_err(|err| match err {
            limited @ (AbgError::RateLimit { .. } | AbgError::Timeout { .. }) => limited,
            other => AbgError::UpstreamUnresolved(format!("{}: {other}", self.describe())),
        })?;
        releases
            .into_iter()
            .filter(|release| !release.prerelease)
            .filter_map(|release| {
                let version = Version::parse(release.tag.trim_start_matches('v')).ok()?;
                Some((version, release))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(version, release)| UpstreamRelease {
                version,
                changes: summarize_notes(&release.notes),
                tag: Some(release.tag),
            })
            .ok_or_else(|| {
                AbgError::UpstreamUnresolved(format!("{} has no semver-tagged release", self.describe()))
            })
    }

    fn fetch(&self, release: &UpstreamRelease, dest: &Path) -> Result<PathBuf> {
        let tag = release
            .tag
            .clone()
            .unwrap_or_else(|| format!("v{}", release.version));
        let artifact = self
            .distributor
            .download_distribution(&self.repository, &dest.join("download"), Some(&tag))?;
        debug!(artifact = %artifact.display(), "downloaded upstream release");
        let extracted = extract_tree(&artifact, &dest.join("upstream"), true)?;
        Ok(extracted.root)
    }
}

fn parse_version(raw: &str, origin: &str) -> Result<Version> {
    Version::parse(raw.trim_start_matches('v'))
        .map_err(|err| AbgError::UpstreamUnresolved(format!("{origin}: version '{raw}': {err}")))
}

/// Bullet lines of release notes, without their markers.
fn summarize_notes(notes: &str) -> Vec<String> {
    notes
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")))
        .map(str::to_string)
        .take(MAX_CHANGES)
        .collect()
}
