//! On-disk tree construction for a bundle.
//!
//! Layout under `<output_root>/<name>-<version>/`:
//!
//! ```text
//! agents/<agent>.md          agent definitions
//! tests/<agent>.tests.md     shipped test scenarios (when the agent has any)
//! docs/<agent>.md            per-agent documentation
//! config/bundle_config.json  runtime settings
//! bundle.toml                distributable metadata
//! README.md, INSTRUCTIONS.md
//! repackage.sh, repackage.ps1
//! manifest.json              identity + checksums of everything above
//! dist/                      prebuilt platform package (not tracked)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bundler::checksum::{Checksum, hash_file, tree_files};
use crate::bundler::local_safety::validate_output_root;
use crate::bundler::manifest::{
    BUNDLE_CONFIG_FILE, BundleConfigFile, BuildDescriptor, DISTRIBUTABLE_METADATA_FILE,
    DistributableMetadata, MANIFEST_FILE, Manifest,
};
use crate::bundler::model::Bundle;
use crate::bundler::package::{DIST_DIR, PackageFormat, descriptor_entry, write_archive};
use crate::bundler::templates;
use crate::error::{AbgError, Result};
use crate::utils::fs::{set_executable, write_file};

const SUBDIRS: &[&str] = &["agents", "tests", "docs", "config", DIST_DIR];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Build `dist/<name>-<version>.agentpkg` after the tree is written.
    pub prebuild: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self { prebuild: true }
    }
}

/// Outcome of the best-effort prebuild step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PrebuildOutcome {
    Skipped,
    Built { artifact: PathBuf },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledTree {
    pub root: PathBuf,
    pub manifest: Manifest,
    pub prebuild: PrebuildOutcome,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    output_root: PathBuf,
    options: AssembleOptions,
}

impl Assembler {
    /// Validates `output_root` (symlink first, then the system deny-list).
    pub fn new(output_root: impl AsRef<Path>) -> Result<Self> {
        let output_root = validate_output_root(output_root.as_ref())?;
        Ok(Self {
            output_root,
            options: AssembleOptions::default(),
        })
    }

    #[must_use]
    pub const fn with_options(mut self, options: AssembleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn assemble(&self, bundle: &Bundle) -> Result<AssembledTree> {
        bundle.validate()?;
        let root = self.output_root.join(bundle.tree_name());
        prepare_tree_root(&root)?;

        for dir in SUBDIRS {
            fs::create_dir_all(root.join(dir))
                .map_err(|err| AbgError::packaging_at("directory creation", err, root.clone()))?;
        }

        for agent in &bundle.agents {
            write_stage(&root, &agent.file_path(), &agent.content, "agent write")?;
            if let Some(tests) = &agent.tests {
                write_stage(&root, &format!("tests/{}.tests.md", agent.name), tests, "test write")?;
            }
            write_stage(
                &root,
                &format!("docs/{}.md", agent.name),
                &templates::agent_docs(agent),
                "docs write",
            )?;
        }

        let config = serde_json::to_string_pretty(&BundleConfigFile::for_bundle(bundle))?;
        write_stage(&root, BUNDLE_CONFIG_FILE, &config, "config write")?;

        let metadata = DistributableMetadata::for_bundle(bundle).to_toml_string()?;
        write_stage(&root, DISTRIBUTABLE_METADATA_FILE, &metadata, "metadata write")?;

        write_stage(&root, "README.md", &templates::readme(bundle), "readme write")?;
        write_stage(&root, "INSTRUCTIONS.md", &templates::instructions(bundle), "readme write")?;

        for (name, body) in [
            ("repackage.sh", templates::repackage_sh(bundle)),
            ("repackage.ps1", templates::repackage_ps1(bundle)),
        ] {
            write_stage(&root, name, &body, "script write")?;
            set_executable(&root.join(name))
                .map_err(|err| AbgError::packaging_at("script write", err, root.clone()))?;
        }

        let checksums = collect_checksums(&root)
            .map_err(|err| AbgError::packaging_at("checksum", err, root.clone()))?;
        let manifest = Manifest::from_bundle(bundle, checksums);
        manifest
            .write_atomic(&root.join(MANIFEST_FILE))
            .map_err(|err| AbgError::packaging_at("manifest write", err, root.clone()))?;

        info!(
            bundle = %bundle.name,
            root = %root.display(),
            files = manifest.file_checksums.len(),
            "assembled bundle tree"
        );

        let mut warnings = Vec::new();
        let prebuild = if self.options.prebuild {
            prebuild_step(&root, bundle, &mut warnings)
        } else {
            PrebuildOutcome::Skipped
        };

        Ok(AssembledTree {
            root,
            manifest,
            prebuild,
            warnings,
        })
    }
}

/// Assemble `bundle` under `output_root` with default options.
pub fn assemble(bundle: &Bundle, output_root: &Path) -> Result<AssembledTree> {
    Assembler::new(output_root)?.assemble(bundle)
}

/// Recompute every tracked checksum of an assembled tree and rewrite its manifest.
pub fn refresh_manifest(tree: &Path) -> Result<Manifest> {
    let mut manifest = Manifest::load_from_dir(tree)?;
    manifest.file_checksums = collect_checksums(tree)?;
    manifest.write_atomic(&tree.join(MANIFEST_FILE))?;
    debug!(tree = %tree.display(), "refreshed manifest checksums");
    Ok(manifest)
}

/// Checksums of every file except the manifest and `dist/`.
pub fn collect_checksums(root: &Path) -> Result<BTreeMap<String, Checksum>> {
    let dist_prefix = format!("{DIST_DIR}/");
    let mut checksums = BTreeMap::new();
    for rel in tree_files(root)? {
        if rel == MANIFEST_FILE || rel.starts_with(&dist_prefix) {
            continue;
        }
        let digest = hash_file(&root.join(&rel))?;
        checksums.insert(rel, digest);
    }
    Ok(checksums)
}

/// A fresh tree root: reuse only a previous assembly, never a foreign directory or a link.
fn prepare_tree_root(root: &Path) -> Result<()> {
    match fs::symlink_metadata(root) {
        Ok(meta) if meta.file_type().is_symlink() => Err(AbgError::UnsafeOutputPath {
            path: root.to_path_buf(),
            reason: "bundle directory is a symlink".to_string(),
        }),
        Ok(meta) if meta.is_dir() => {
            if !root.join(MANIFEST_FILE).is_file() {
                return Err(AbgError::packaging_at(
                    "directory creation",
                    "directory exists and is not an assembled bundle",
                    root.to_path_buf(),
                ));
            }
            fs::remove_dir_all(root)
                .map_err(|err| AbgError::packaging_at("directory creation", err, root.to_path_buf()))
        }
        Ok(_) => Err(AbgError::packaging_at(
            "directory creation",
            "path exists and is not a directory",
            root.to_path_buf(),
        )),
        Err(_) => Ok(()),
    }
}

fn write_stage(root: &Path, rel: &str, contents: &str, stage: &str) -> Result<()> {
    write_file(&root.join(rel), contents)
        .map_err(|err| AbgError::packaging_at(stage, err, root.to_path_buf()))
}

/// Best-effort prebuild: a failure becomes an outcome plus a warning.
fn prebuild_step(root: &Path, bundle: &Bundle, warnings: &mut Vec<String>) -> PrebuildOutcome {
    match prebuild_platform_package(root, bundle) {
        Ok(artifact) => PrebuildOutcome::Built { artifact },
        Err(err) => {
            warn!(error = %err, "platform package prebuild failed");
            warnings.push(format!("platform package prebuild failed: {err}"));
            PrebuildOutcome::Failed {
                reason: err.to_string(),
            }
        }
    }
}

fn prebuild_platform_package(root: &Path, bundle: &Bundle) -> Result<PathBuf> {
    let descriptor = BuildDescriptor::for_bundle(bundle);
    let out = root.join(DIST_DIR).join(format!(
        "{}{}",
        bundle.tree_name(),
        PackageFormat::PlatformPackage.extension()
    ));
    write_archive(
        root,
        &bundle.tree_name(),
        PackageFormat::PlatformPackage,
        &out,
        &descriptor_entry(&descriptor)?,
        6,
    )?;
    Ok(out)
}
