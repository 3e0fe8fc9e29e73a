//! Local Modification Safety
//!
//! Guards the output directory before anything is written, tracks user edits
//! to an assembled tree, and takes whole-tree backups before updates.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::bundler::checksum::{Checksum, hash_file, tree_files};
use crate::bundler::manifest::{MANIFEST_FILE, Manifest, ensure_relative_path};
use crate::error::{AbgError, Result};
use crate::utils::fs::copy_dir_all;

// =============================================================================
// OUTPUT ROOT
// =============================================================================

/// System roots nothing may be written under.
pub const PROTECTED_ROOTS: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/sys", "/proc", "/dev"];

/// Conventional temp prefixes that always pass.
pub const TEMP_PREFIXES: &[&str] = &["/tmp/", "/var/tmp/", "/var/folders/", "/private/var/folders/"];

/// Validate a caller-supplied output root and return its resolved form.
///
/// The symlink check runs on the raw path, before any canonicalization.
pub fn validate_output_root(output_root: &Path) -> Result<PathBuf> {
    if output_root.as_os_str().is_empty() {
        return Err(AbgError::Validation("output directory is required".to_string()));
    }

    match fs::symlink_metadata(output_root) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(AbgError::UnsafeOutputPath {
                path: output_root.to_path_buf(),
                reason: "output directory is a symlink".to_string(),
            });
        }
        Ok(meta) if !meta.is_dir() => {
            return Err(AbgError::UnsafeOutputPath {
                path: output_root.to_path_buf(),
                reason: "output path exists and is not a directory".to_string(),
            });
        }
        _ => {}
    }

    let resolved = resolve_lexically(output_root)?;
    if is_temp_path(&resolved) {
        return Ok(resolved);
    }
    if resolved == Path::new("/") {
        return Err(AbgError::UnsafeOutputPath {
            path: resolved,
            reason: "refusing to write to the filesystem root".to_string(),
        });
    }
    if let Some(root) = PROTECTED_ROOTS
        .iter()
        .find(|root| resolved.starts_with(Path::new(root)))
    {
        return Err(AbgError::UnsafeOutputPath {
            path: resolved.clone(),
            reason: format!("inside protected system directory {root}"),
        });
    }
    Ok(resolved)
}

fn is_temp_path(resolved: &Path) -> bool {
    let text = format!("{}/", resolved.display());
    if TEMP_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
        return true;
    }
    fs::canonicalize(std::env::temp_dir())
        .map(|tmp| resolved.starts_with(tmp))
        .unwrap_or(false)
}

/// Canonicalize the longest existing ancestor and re-append the rest.
fn resolve_lexically(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    for part in tail.into_iter().rev() {
        let part_path = Path::new(&part);
        match part_path.components().next() {
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(Component::CurDir) | None => {}
            _ => resolved.push(part_path),
        }
    }
    Ok(resolved)
}

// =============================================================================
// MODIFICATION STATUS
// =============================================================================

/// Status of a tracked file relative to the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationStatus {
    /// File matches the manifest checksum
    Clean,
    /// File content differs from the manifest checksum
    Modified,
    /// File exists but is not tracked by the manifest
    New,
    /// File is tracked but missing on disk
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub status: ModificationStatus,
    pub current_hash: Option<Checksum>,
    pub expected_hash: Option<Checksum>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationSummary {
    pub clean: usize,
    pub modified: usize,
    pub new: usize,
    pub deleted: usize,
}

impl ModificationSummary {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.clean + self.modified + self.new + self.deleted
    }

    #[must_use]
    pub const fn needs_attention(&self) -> bool {
        self.modified > 0 || self.deleted > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationReport {
    pub bundle_path: PathBuf,
    pub files: Vec<FileStatus>,
    pub summary: ModificationSummary,
}

impl ModificationReport {
    pub fn modified_paths(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|f| f.status == ModificationStatus::Modified)
            .map(|f| f.path.as_str())
    }
}

/// Compare every file under `bundle_path` with the manifest checksums.
pub fn detect_modifications(bundle_path: &Path, manifest: &Manifest) -> Result<ModificationReport> {
    let mut files = Vec::new();
    let mut summary = ModificationSummary::default();

    for (rel, expected) in &manifest.file_checksums {
        let live = bundle_path.join(ensure_relative_path(rel)?);
        if !live.is_file() {
            summary.deleted += 1;
            files.push(FileStatus {
                path: rel.clone(),
                status: ModificationStatus::Deleted,
                current_hash: None,
                expected_hash: Some(expected.clone()),
            });
            continue;
        }
        let current = hash_file(&live)?;
        let status = if &current == expected {
            summary.clean += 1;
            ModificationStatus::Clean
        } else {
            summary.modified += 1;
            ModificationStatus::Modified
        };
        files.push(FileStatus {
            path: rel.clone(),
            status,
            current_hash: Some(current),
            expected_hash: Some(expected.clone()),
        });
    }

    for rel in tree_files(bundle_path)? {
        if rel == MANIFEST_FILE || manifest.file_checksums.contains_key(&rel) {
            continue;
        }
        summary.new += 1;
        let current = hash_file(&bundle_path.join(&rel))?;
        files.push(FileStatus {
            path: rel,
            status: ModificationStatus::New,
            current_hash: Some(current),
            expected_hash: None,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(ModificationReport {
        bundle_path: bundle_path.to_path_buf(),
        files,
        summary,
    })
}

/// Tracked path -> customized?, skipping files that were deleted.
#[must_use]
pub fn customization_map(report: &ModificationReport) -> BTreeMap<String, bool> {
    report
        .files
        .iter()
        .filter_map(|file| match file.status {
            ModificationStatus::Clean => Some((file.path.clone(), false)),
            ModificationStatus::Modified => Some((file.path.clone(), true)),
            ModificationStatus::New | ModificationStatus::Deleted => None,
        })
        .collect()
}

// =============================================================================
// BACKUP
// =============================================================================

/// Copy `bundle_path` to a sibling `<name>.backup-<timestamp>` directory.
pub fn backup_tree(bundle_path: &Path) -> Result<PathBuf> {
    let name = bundle_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AbgError::Backup(format!("no directory name in {}", bundle_path.display())))?;
    let parent = bundle_path.parent().unwrap_or_else(|| Path::new("."));
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");

    let mut backup_path = parent.join(format!("{name}.backup-{timestamp}"));
    let mut attempt = 1;
    while backup_path.exists() {
        backup_path = parent.join(format!("{name}.backup-{timestamp}-{attempt}"));
        attempt += 1;
    }

    copy_dir_all(bundle_path, &backup_path).map_err(|err| {
        AbgError::Backup(format!(
            "copy {} to {}: {err}",
            bundle_path.display(),
            backup_path.display()
        ))
    })?;
    Ok(backup_path)
}

/// Replace `bundle_path` with the contents of `backup_path`.
pub fn restore_backup(backup_path: &Path, bundle_path: &Path) -> Result<()> {
    if !backup_path.join(MANIFEST_FILE).is_file() {
        return Err(AbgError::Backup(format!(
            "{} is not a bundle backup",
            backup_path.display()
        )));
    }
    if bundle_path.exists() {
        fs::remove_dir_all(bundle_path)?;
    }
    copy_dir_all(backup_path, bundle_path)
        .map_err(|err| AbgError::Backup(format!("restore {}: {err}", bundle_path.display())))
}
