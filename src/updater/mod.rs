//! Update tracking for distributed bundles.
//!
//! A bundle on disk remembers, through its manifest, the checksum of every
//! file it shipped with. That is enough to tell user edits apart from
//! upstream changes and merge a newer version without clobbering edits.

pub mod upstream;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bundler::checksum::hash_file;
use crate::bundler::local_safety::{backup_tree, customization_map, detect_modifications};
use crate::bundler::manifest::{MANIFEST_FILE, Manifest, ensure_relative_path};
use crate::error::{AbgError, Result, StructuredError};

pub use crate::bundler::local_safety::restore_backup;
pub use upstream::{DirectoryUpstream, ReleaseUpstream, UpstreamRelease, UpstreamSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub available: bool,
    pub current_version: String,
    pub latest_version: String,
    pub upstream: String,
    /// Short summary of what changed, empty when no update is available.
    #[serde(default)]
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub success: bool,
    pub from_version: String,
    pub to_version: String,
    #[serde(default)]
    pub updated_files: Vec<String>,
    /// Local edits kept because upstream left the file alone.
    #[serde(default)]
    pub preserved_files: Vec<String>,
    /// Edited locally and changed upstream; left untouched.
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub removed_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

impl UpdateResult {
    fn new(from: &Version, to: &Version, backup_path: Option<PathBuf>) -> Self {
        Self {
            success: false,
            from_version: from.to_string(),
            to_version: to.to_string(),
            updated_files: Vec::new(),
            preserved_files: Vec::new(),
            conflicts: Vec::new(),
            removed_files: Vec::new(),
            backup_path,
            error: None,
        }
    }

    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Compares an installed bundle against one upstream.
#[derive(Debug)]
pub struct UpdateTracker<U> {
    upstream: U,
}

impl<U: UpstreamSource> UpdateTracker<U> {
    pub const fn new(upstream: U) -> Self {
        Self { upstream }
    }

    pub const fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn check_for_updates(&self, bundle_path: &Path) -> Result<UpdateInfo> {
        let manifest = Manifest::load_from_dir(bundle_path)?;
        let current = installed_version(bundle_path, &manifest)?;
        let latest = self.upstream.latest()?;
        let available = latest.version > current;
        debug!(
            bundle = %bundle_path.display(),
            current = %current,
            latest = %latest.version,
            available,
            "checked for updates"
        );
        Ok(UpdateInfo {
            available,
            current_version: current.to_string(),
            latest_version: latest.version.to_string(),
            upstream: self.upstream.describe(),
            changes: if available { latest.changes } else { Vec::new() },
        })
    }

    /// Tracked path -> edited since install. Deleted files are skipped.
    pub fn detect_customizations(&self, bundle_path: &Path) -> Result<BTreeMap<String, bool>> {
        let manifest = Manifest::load_from_dir(bundle_path)?;
        let report = detect_modifications(bundle_path, &manifest)?;
        Ok(customization_map(&report))
    }

    /// Merge the newest upstream version into `bundle_path`.
    ///
    /// Reading state (manifest, upstream) raises. Once files start changing,
    /// failures are reported in the result together with the backup path.
    pub fn update_bundle(&self, bundle_path: &Path, preserve_edits: bool, backup: bool) -> Result<UpdateResult> {
        let manifest = Manifest::load_from_dir(bundle_path)?;
        let current = installed_version(bundle_path, &manifest)?;
        let release = self.upstream.latest()?;

        if release.version <= current {
            info!(bundle = %bundle_path.display(), version = %current, "bundle is up to date");
            let mut result = UpdateResult::new(&current, &current, None);
            result.success = true;
            return Ok(result);
        }

        let scratch = tempfile::tempdir()?;
        let upstream_root = self.upstream.fetch(&release, scratch.path())?;
        let upstream_manifest = Manifest::load_from_dir(&upstream_root)?;

        let customized = if preserve_edits {
            self.detect_customizations(bundle_path)?
        } else {
            BTreeMap::new()
        };

        let backup_path = if backup {
            let path = backup_tree(bundle_path)?;
            info!(backup = %path.display(), "backed up bundle");
            Some(path)
        } else {
            None
        };

        let mut result = UpdateResult::new(&current, &release.version, backup_path);
        let merge = Merge {
            bundle_path,
            upstream_root: &upstream_root,
            local: &manifest,
            upstream: &upstream_manifest,
            customized: &customized,
            preserve_edits,
        };
        match merge.apply(&mut result) {
            Ok(()) => {
                result.success = true;
                info!(
                    bundle = %bundle_path.display(),
                    from = %result.from_version,
                    to = %result.to_version,
                    updated = result.updated_files.len(),
                    preserved = result.preserved_files.len(),
                    conflicts = result.conflicts.len(),
                    "updated bundle"
                );
            }
            Err(err) => {
                warn!(bundle = %bundle_path.display(), error = %err, "update failed");
                result.error = Some(err.to_structured());
            }
        }
        Ok(result)
    }
}

struct Merge<'a> {
    bundle_path: &'a Path,
    upstream_root: &'a Path,
    local: &'a Manifest,
    upstream: &'a Manifest,
    customized: &'a BTreeMap<String, bool>,
    preserve_edits: bool,
}

impl Merge<'_> {
    fn is_customized(&self, rel: &str) -> bool {
        self.preserve_edits && self.customized.get(rel).copied().unwrap_or(false)
    }

    fn apply(&self, result: &mut UpdateResult) -> Result<()> {
        for (rel, upstream_sum) in &self.upstream.file_checksums {
            let rel_path = ensure_relative_path(rel)?;
            let live = self.bundle_path.join(&rel_path);
            let shipped = self.local.file_checksums.get(rel);
            let upstream_changed = shipped != Some(upstream_sum);

            if self.is_customized(rel) {
                if upstream_changed {
                    result.conflicts.push(rel.clone());
                } else {
                    result.preserved_files.push(rel.clone());
                }
                continue;
            }

            // An untracked local file in the way of a new upstream file.
            if shipped.is_none() && self.preserve_edits && live.is_file() && &hash_file(&live)? != upstream_sum {
                result.conflicts.push(rel.clone());
                continue;
            }

            if live.is_file() && &hash_file(&live)? == upstream_sum {
                continue;
            }
            if let Some(parent) = live.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(self.upstream_root.join(&rel_path), &live)?;
            result.updated_files.push(rel.clone());
        }

        for rel in self.local.file_checksums.keys() {
            if self.upstream.file_checksums.contains_key(rel) {
                continue;
            }
            if self.is_customized(rel) {
                result.conflicts.push(rel.clone());
                continue;
            }
            let live = self.bundle_path.join(ensure_relative_path(rel)?);
            if live.is_file() {
                fs::remove_file(&live)?;
                result.removed_files.push(rel.clone());
            }
        }

        self.upstream
            .write_atomic(&self.bundle_path.join(MANIFEST_FILE))
            .map_err(|err| AbgError::packaging_at("manifest write", err, self.bundle_path.to_path_buf()))
    }
}

fn installed_version(bundle_path: &Path, manifest: &Manifest) -> Result<Version> {
    Version::parse(&manifest.bundle.version).map_err(|err| AbgError::ManifestInvalid {
        path: bundle_path.join(MANIFEST_FILE),
        reason: format!("version '{}': {err}", manifest.bundle.version),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::assemble::assemble;
    use crate::test_utils::bundle_with_agents;
    use tempfile::TempDir;

    fn installed(temp: &TempDir, version: &str, agents: &[&str]) -> PathBuf {
        let bundle = bundle_with_agents("demo_bundle", version, agents);
        assemble(&bundle, &temp.path().join(format!("v{version}"))).unwrap().root
    }

    #[test]
    fn check_reports_newer_upstream() {
        let temp = TempDir::new().unwrap();
        let local = installed(&temp, "1.0.0", &["alpha"]);
        let upstream = installed(&temp, "1.2.0", &["alpha"]);
        let tracker = UpdateTracker::new(DirectoryUpstream::new(&upstream));

        let info = tracker.check_for_updates(&local).unwrap();
        assert!(info.available);
        assert_eq!(info.current_version, "1.0.0");
        assert_eq!(info.latest_version, "1.2.0");

        let info = UpdateTracker::new(DirectoryUpstream::new(&local))
            .check_for_updates(&upstream)
            .unwrap();
        assert!(!info.available);
    }

    #[test]
    fn check_without_manifest_raises() {
        let temp = TempDir::new().unwrap();
        let tracker = UpdateTracker::new(DirectoryUpstream::new(temp.path()));
        let err = tracker.check_for_updates(temp.path()).unwrap_err();
        assert!(matches!(err, AbgError::ManifestMissing(_)));
    }

    #[test]
    fn up_to_date_bundle_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let local = installed(&temp, "1.0.0", &["alpha"]);
        let tracker = UpdateTracker::new(DirectoryUpstream::new(&local));
        let result = tracker.update_bundle(&local, true, true).unwrap();
        assert!(result.success);
        assert!(result.backup_path.is_none());
        assert!(result.updated_files.is_empty());
    }

    #[test]
    fn removed_upstream_agent_is_deleted() {
        let temp = TempDir::new().unwrap();
        let local = installed(&temp, "1.0.0", &["alpha", "beta"]);
        let upstream = installed(&temp, "2.0.0", &["alpha"]);
        let tracker = UpdateTracker::new(DirectoryUpstream::new(&upstream));

        let result = tracker.update_bundle(&local, true, false).unwrap();
        assert!(result.success, "{:?}", result.error);
        assert!(result.removed_files.contains(&"agents/beta.md".to_string()));
        assert!(!local.join("agents/beta.md").exists());
        let manifest = Manifest::load_from_dir(&local).unwrap();
        assert_eq!(manifest.bundle.version, "2.0.0");
    }
}
