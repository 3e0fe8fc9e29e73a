//! Archive packaging and extraction.
//!
//! Archives are canonical: entries are sorted by path, timestamps are zeroed,
//! ownership is root/root and modes are normalized to 0644/0755, so packaging
//! the same bundle twice yields byte-identical artifacts and checksums.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use tar::{Builder, EntryType, Header};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::bundler::assemble::{AssembleOptions, Assembler, refresh_manifest};
use crate::bundler::checksum::{Checksum, hash_file, hash_path, relative_slash_path};
use crate::bundler::local_safety::validate_output_root;
use crate::bundler::manifest::{
    BUILD_DESCRIPTOR_FILE, BuildDescriptor, MANIFEST_FILE, Manifest, ensure_relative_path,
};
use crate::bundler::model::Bundle;
use crate::error::{AbgError, Result};
use crate::utils::fs::{copy_dir_all, ensure_dir, is_executable, path_size};

/// Directory inside an assembled tree that never ships in an archive.
pub const DIST_DIR: &str = "dist";

/// Closed set of artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageFormat {
    TarGz,
    Zip,
    Directory,
    /// Gzip tar renamed to `.agentpkg`, carrying `agent-package.json`.
    #[serde(rename = "agentpkg")]
    PlatformPackage,
}

impl PackageFormat {
    pub const ALL: [Self; 4] = [Self::TarGz, Self::Zip, Self::Directory, Self::PlatformPackage];

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::Zip => ".zip",
            Self::Directory => "",
            Self::PlatformPackage => ".agentpkg",
        }
    }

    #[must_use]
    pub const fn is_archive(self) -> bool {
        !matches!(self, Self::Directory)
    }

    /// Detect the format of an artifact on disk from its extension.
    pub fn detect(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self::Directory);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else if name.ends_with(".agentpkg") {
            Ok(Self::PlatformPackage)
        } else {
            Err(AbgError::UnknownFormat(format!(
                "cannot detect package format of {}",
                path.display()
            )))
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TarGz => "tar-gz",
            Self::Zip => "zip",
            Self::Directory => "directory",
            Self::PlatformPackage => "agentpkg",
        };
        f.write_str(s)
    }
}

impl FromStr for PackageFormat {
    type Err = AbgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tar-gz" | "tar.gz" | "tgz" | "tar-gzip" => Ok(Self::TarGz),
            "zip" => Ok(Self::Zip),
            "directory" | "dir" => Ok(Self::Directory),
            "agentpkg" | "platform-package" | "platform" => Ok(Self::PlatformPackage),
            other => Err(AbgError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageOptions {
    /// Delete the intermediate tree after an archive is written.
    pub cleanup: bool,
    /// Deflate/gzip level, 0-9.
    pub compression_level: u32,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            cleanup: true,
            compression_level: 6,
        }
    }
}

/// Immutable result of one packaging call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagedBundle {
    pub bundle: Bundle,
    pub path: PathBuf,
    pub format: PackageFormat,
    pub checksum: Checksum,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<BuildDescriptor>,
}

impl PackagedBundle {
    /// `agent-bundle-<name>`, used when no repository is named.
    #[must_use]
    pub fn default_repository(&self) -> String {
        format!("agent-bundle-{}", self.bundle.name)
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Serializes bundles into artifacts under one output directory.
#[derive(Debug, Clone)]
pub struct Packager {
    output_dir: PathBuf,
}

impl Packager {
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = validate_output_root(output_dir.as_ref())?;
        Ok(Self { output_dir })
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Assemble `bundle` and serialize it into `format`.
    pub fn package(
        &self,
        bundle: &Bundle,
        format: PackageFormat,
        options: PackageOptions,
    ) -> Result<PackagedBundle> {
        let assembled = Assembler::new(&self.output_dir)?
            .with_options(AssembleOptions { prebuild: false })
            .assemble(bundle)?;

        let packaged = self.serialize(&assembled.root, bundle, format, options)?;

        if format.is_archive() && options.cleanup {
            fs::remove_dir_all(&assembled.root).map_err(|err| {
                AbgError::packaging_at("cleanup", err, assembled.root.clone())
            })?;
            debug!(tree = %assembled.root.display(), "removed intermediate tree");
        }
        Ok(packaged)
    }

    /// Serialize an already assembled, possibly hand-edited, tree.
    ///
    /// The artifact carries refreshed checksums so it validates on extract.
    /// The refresh happens on a scratch copy: the source tree's manifest keeps
    /// its baseline, so local edits stay visible to the update tracker.
    pub fn package_tree(
        &self,
        tree: &Path,
        format: PackageFormat,
        options: PackageOptions,
    ) -> Result<PackagedBundle> {
        let baseline = Manifest::load_from_dir(tree)?;
        let tree_name = format!("{}-{}", baseline.bundle.name, baseline.bundle.version);

        let scratch = tempfile::Builder::new().prefix("abg-repackage-").tempdir()?;
        let staged = scratch.path().join(&tree_name);
        copy_dir_all(tree, &staged)
            .map_err(|err| AbgError::packaging_at("tree copy", err, staged.clone()))?;
        let manifest = refresh_manifest(&staged)?;
        let bundle = manifest.to_bundle(&staged)?;

        if format == PackageFormat::Directory {
            let target = self.output_dir.join(bundle.tree_name());
            if fs::canonicalize(tree).ok() == fs::canonicalize(&target).ok() {
                return Err(AbgError::Validation(format!(
                    "directory output {} is the source tree; choose another output directory",
                    target.display()
                )));
            }
            if target.exists() {
                fs::remove_dir_all(&target)
                    .map_err(|err| AbgError::packaging_at("directory copy", err, target.clone()))?;
            }
            copy_dir_all(&staged, &target)
                .map_err(|err| AbgError::packaging_at("directory copy", err, target.clone()))?;
            return self.serialize(&target, &bundle, format, options);
        }
        self.serialize(&staged, &bundle, format, options)
    }

    fn serialize(
        &self,
        tree: &Path,
        bundle: &Bundle,
        format: PackageFormat,
        options: PackageOptions,
    ) -> Result<PackagedBundle> {
        let prefix = bundle.tree_name();
        let (path, descriptor) = match format {
            PackageFormat::Directory => (tree.to_path_buf(), None),
            PackageFormat::TarGz | PackageFormat::Zip => {
                let out = self
                    .output_dir
                    .join(format!("{prefix}{}", format.extension()));
                write_archive(tree, &prefix, format, &out, &[], options.compression_level)?;
                (out, None)
            }
            PackageFormat::PlatformPackage => {
                let descriptor = BuildDescriptor::for_bundle(bundle);
                let out = self
                    .output_dir
                    .join(format!("{prefix}{}", format.extension()));
                let extra = descriptor_entry(&descriptor)?;
                write_archive(tree, &prefix, format, &out, &extra, options.compression_level)?;
                (out, Some(descriptor))
            }
        };

        let checksum = hash_path(&path)
            .map_err(|err| AbgError::packaging_at("artifact hash", err, path.clone()))?;
        let size_bytes =
            path_size(&path).map_err(|err| AbgError::packaging_at("artifact size", err, path.clone()))?;

        info!(
            bundle = %bundle.name,
            format = %format,
            path = %path.display(),
            size_bytes,
            "packaged bundle"
        );

        Ok(PackagedBundle {
            bundle: bundle.clone(),
            path,
            format,
            checksum,
            size_bytes,
            descriptor,
        })
    }
}

pub(crate) fn descriptor_entry(descriptor: &BuildDescriptor) -> Result<Vec<(String, Vec<u8>)>> {
    let mut json = serde_json::to_vec_pretty(descriptor)?;
    json.push(b'\n');
    Ok(vec![(BUILD_DESCRIPTOR_FILE.to_string(), json)])
}

// =============================================================================
// ARCHIVE WRITING
// =============================================================================

enum EntrySource {
    Dir,
    File { path: PathBuf, executable: bool },
    Bytes(Vec<u8>),
}

/// Every shippable entry under `root`, keyed (and so sorted) by relative path.
fn archive_entries(
    root: &Path,
    extra: &[(String, Vec<u8>)],
) -> Result<BTreeMap<String, EntrySource>> {
    let mut entries = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == DIST_DIR && e.file_type().is_dir()));

    for entry in walker {
        let entry = entry.map_err(|err| AbgError::packaging("archive scan", err))?;
        let rel = relative_slash_path(root, entry.path())?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            entries.insert(rel, EntrySource::Dir);
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|err| AbgError::packaging("archive scan", err))?;
            entries.insert(
                rel,
                EntrySource::File {
                    path: entry.path().to_path_buf(),
                    executable: is_executable(&meta),
                },
            );
        }
    }
    for (rel, bytes) in extra {
        entries.insert(rel.clone(), EntrySource::Bytes(bytes.clone()));
    }
    Ok(entries)
}

/// Write `root` as a canonical archive at `out`, entries prefixed by `prefix/`.
pub(crate) fn write_archive(
    root: &Path,
    prefix: &str,
    format: PackageFormat,
    out: &Path,
    extra: &[(String, Vec<u8>)],
    level: u32,
) -> Result<()> {
    let entries = archive_entries(root, extra)?;
    if let Some(parent) = out.parent() {
        ensure_dir(parent)?;
    }
    let result = match format {
        PackageFormat::TarGz | PackageFormat::PlatformPackage => {
            write_tar_gz(&entries, prefix, out, level)
        }
        PackageFormat::Zip => write_zip(&entries, prefix, out, level),
        PackageFormat::Directory => {
            return Err(AbgError::UnknownFormat(
                "directory is not an archive format".to_string(),
            ));
        }
    };
    result.map_err(|err| AbgError::packaging_at("archive write", err, out.to_path_buf()))
}

fn entry_bytes(source: &EntrySource) -> io::Result<(Vec<u8>, u32)> {
    match source {
        EntrySource::Dir => Ok((Vec::new(), 0o755)),
        EntrySource::File { path, executable } => {
            let mode = if *executable { 0o755 } else { 0o644 };
            Ok((fs::read(path)?, mode))
        }
        EntrySource::Bytes(bytes) => Ok((bytes.clone(), 0o644)),
    }
}

fn write_tar_gz(
    entries: &BTreeMap<String, EntrySource>,
    prefix: &str,
    out: &Path,
    level: u32,
) -> io::Result<()> {
    let file = File::create(out)?;
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(file, Compression::new(level.min(9)));
    let mut builder = Builder::new(encoder);

    let mut header = Header::new_gnu();
    header.set_size(0);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o755);
    header.set_entry_type(EntryType::Directory);
    builder.append_data(&mut header, format!("{prefix}/"), io::empty())?;

    for (rel, source) in entries {
        let (contents, mode) = entry_bytes(source)?;
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(mode);
        if matches!(source, EntrySource::Dir) {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, format!("{prefix}/{rel}/"), io::empty())?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_size(contents.len() as u64);
            builder.append_data(&mut header, format!("{prefix}/{rel}"), contents.as_slice())?;
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.sync_all()?;
    Ok(())
}

fn write_zip(
    entries: &BTreeMap<String, EntrySource>,
    prefix: &str,
    out: &Path,
    level: u32,
) -> io::Result<()> {
    let file = File::create(out)?;
    let mut zip = ZipWriter::new(file);
    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(level.min(9))))
        .last_modified_time(zip::DateTime::default());

    zip.add_directory(format!("{prefix}/"), base.unix_permissions(0o755))
        .map_err(io::Error::other)?;
    for (rel, source) in entries {
        let (contents, mode) = entry_bytes(source)?;
        if matches!(source, EntrySource::Dir) {
            zip.add_directory(format!("{prefix}/{rel}/"), base.unix_permissions(mode))
                .map_err(io::Error::other)?;
        } else {
            zip.start_file(format!("{prefix}/{rel}"), base.unix_permissions(mode))
                .map_err(io::Error::other)?;
            zip.write_all(&contents)?;
        }
    }
    zip.finish().map_err(io::Error::other)?.sync_all()?;
    Ok(())
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// An artifact unpacked on disk.
#[derive(Debug, Clone)]
pub struct ExtractedBundle {
    /// Directory holding `manifest.json`.
    pub root: PathBuf,
    pub manifest: Manifest,
    pub bundle: Bundle,
    pub descriptor: Option<BuildDescriptor>,
}

/// Unpack `package_path` into `target_dir` and rebuild its bundle.
pub fn extract(package_path: &Path, target_dir: &Path, validate: bool) -> Result<Bundle> {
    extract_tree(package_path, target_dir, validate).map(|extracted| extracted.bundle)
}

/// Like [`extract`], also returning where the tree landed.
///
/// The artifact is unpacked into a private staging directory inside
/// `target_dir` and validated there, so whatever `target_dir` already holds
/// is never mistaken for the artifact's contents. Only then are the
/// artifact's top-level entries moved into `target_dir`, replacing entries
/// of the same name.
pub fn extract_tree(package_path: &Path, target_dir: &Path, validate: bool) -> Result<ExtractedBundle> {
    if !package_path.exists() {
        return Err(AbgError::NotFound(format!(
            "package {} does not exist",
            package_path.display()
        )));
    }
    let format = PackageFormat::detect(package_path)?;
    ensure_dir(target_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(".abg-extract-")
        .tempdir_in(target_dir)?;

    match format {
        PackageFormat::Directory => {
            let name = package_path
                .file_name()
                .map_or_else(|| PathBuf::from("bundle"), PathBuf::from);
            copy_dir_all(package_path, &staging.path().join(name))
                .map_err(|err| AbgError::packaging_at("extract", err, target_dir.to_path_buf()))?;
        }
        PackageFormat::TarGz | PackageFormat::PlatformPackage => unpack_tar_gz(package_path, staging.path())
            .map_err(|err| AbgError::packaging_at("extract", err, target_dir.to_path_buf()))?,
        PackageFormat::Zip => unpack_zip(package_path, staging.path())
            .map_err(|err| AbgError::packaging_at("extract", err, target_dir.to_path_buf()))?,
    }

    let staged_root = locate_manifest_root(staging.path())?;
    let manifest = Manifest::load_from_dir(&staged_root)?;
    if validate {
        verify_tree(&staged_root, &manifest)?;
    }

    let rel_root = staged_root
        .strip_prefix(staging.path())
        .map(Path::to_path_buf)
        .unwrap_or_default();
    promote_staged(staging.path(), target_dir)
        .map_err(|err| AbgError::packaging_at("extract", err, target_dir.to_path_buf()))?;
    let root = target_dir.join(rel_root);
    let bundle = manifest.to_bundle(&root)?;

    let descriptor_path = root.join(BUILD_DESCRIPTOR_FILE);
    let descriptor = if descriptor_path.is_file() {
        Some(serde_json::from_str(&fs::read_to_string(&descriptor_path)?)?)
    } else {
        None
    };

    debug!(root = %root.display(), %format, validate, "extracted package");
    Ok(ExtractedBundle {
        root,
        manifest,
        bundle,
        descriptor,
    })
}

/// Move every top-level entry of `staging` into `target`.
fn promote_staged(staging: &Path, target: &Path) -> io::Result<()> {
    for entry in fs::read_dir(staging)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&dest)?,
            Ok(_) => fs::remove_file(&dest)?,
            Err(_) => {}
        }
        fs::rename(entry.path(), &dest)?;
    }
    Ok(())
}

fn unpack_tar_gz(path: &Path, target: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
    archive.set_preserve_permissions(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(target)? {
            return Err(io::Error::other(format!(
                "archive entry {} escapes the target directory",
                entry.path()?.display()
            )));
        }
    }
    Ok(())
}

fn unpack_zip(path: &Path, target: &Path) -> io::Result<()> {
    let mut archive = ZipArchive::new(File::open(path)?).map_err(io::Error::other)?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(io::Error::other)?;
        let rel = file.enclosed_name().ok_or_else(|| {
            io::Error::other(format!("zip entry {} escapes the target directory", file.name()))
        })?;
        let out = target.join(rel);
        if file.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut dest = File::create(&out)?;
        io::copy(&mut file, &mut dest)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
    }
    Ok(())
}

/// Shallowest directory under `dir` that contains a manifest.
fn locate_manifest_root(dir: &Path) -> Result<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .max_depth(3)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == MANIFEST_FILE)
        .min_by_key(walkdir::DirEntry::depth)
        .and_then(|e| e.path().parent().map(Path::to_path_buf))
        .ok_or_else(|| {
            AbgError::packaging_at(
                "manifest lookup",
                format!("no {MANIFEST_FILE} in extracted package"),
                dir.to_path_buf(),
            )
        })
}

/// Check every tracked file against its manifest checksum.
pub fn verify_tree(root: &Path, manifest: &Manifest) -> Result<()> {
    for (rel, expected) in &manifest.file_checksums {
        let path = root.join(ensure_relative_path(rel)?);
        if !path.is_file() {
            return Err(AbgError::ChecksumMismatch {
                path: rel.clone(),
                expected: expected.to_string(),
                actual: "missing".to_string(),
            });
        }
        let actual = hash_file(&path)?;
        if &actual != expected {
            return Err(AbgError::ChecksumMismatch {
                path: rel.clone(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

/// Rebuild a [`PackagedBundle`] from an artifact already on disk.
pub fn inspect(package_path: &Path) -> Result<PackagedBundle> {
    let format = PackageFormat::detect(package_path)?;
    let checksum = hash_path(package_path)?;
    let size_bytes = path_size(package_path)?;

    let scratch = tempfile::tempdir()?;
    let extracted = extract_tree(package_path, scratch.path(), true)?;

    Ok(PackagedBundle {
        bundle: extracted.bundle,
        path: package_path.to_path_buf(),
        format,
        checksum,
        size_bytes,
        descriptor: extracted.descriptor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::model::GeneratedAgent;

    fn demo_bundle() -> Bundle {
        let agent = GeneratedAgent::new(
            "echo_agent",
            "You are an echo agent. Repeat every message back to the user verbatim, \
             preserving whitespace and punctuation exactly as received.",
        )
        .with_role("Echoes input")
        .with_tests("Given 'hi', respond 'hi'.");
        Bundle::new("demo_bundle", "1.0.0", "Echo demo", vec![agent])
    }

    #[test]
    fn format_parsing_and_detection() {
        assert_eq!("tar.gz".parse::<PackageFormat>().unwrap(), PackageFormat::TarGz);
        assert_eq!("platform-package".parse::<PackageFormat>().unwrap(), PackageFormat::PlatformPackage);
        let err = "rar".parse::<PackageFormat>().unwrap_err();
        assert!(matches!(err, AbgError::UnknownFormat(ref f) if f == "rar"));

        assert_eq!(PackageFormat::detect(Path::new("x-1.0.0.tgz")).unwrap(), PackageFormat::TarGz);
        assert_eq!(PackageFormat::detect(Path::new("x.agentpkg")).unwrap(), PackageFormat::PlatformPackage);
        assert!(PackageFormat::detect(Path::new("x.rar")).is_err());
    }

    #[test]
    fn tar_gz_package_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let bundle = demo_bundle();
        let first = packager.package(&bundle, PackageFormat::TarGz, PackageOptions::default()).unwrap();
        let bytes_first = fs::read(&first.path).unwrap();
        let second = packager.package(&bundle, PackageFormat::TarGz, PackageOptions::default()).unwrap();
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(bytes_first, fs::read(&second.path).unwrap());
        assert!(!dir.path().join("demo_bundle-1.0.0").exists());
    }

    #[test]
    fn tar_entries_are_sorted_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let packaged = packager
            .package(&demo_bundle(), PackageFormat::TarGz, PackageOptions::default())
            .unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&packaged.path).unwrap()));
        let mut paths = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mtime().unwrap(), 0);
            assert_eq!(header.uid().unwrap(), 0);
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            assert!(path.starts_with("demo_bundle-1.0.0/"), "{path}");
            if path.ends_with("repackage.sh") {
                assert_eq!(header.mode().unwrap(), 0o755);
            }
            if path.ends_with("README.md") {
                assert_eq!(header.mode().unwrap(), 0o644);
            }
            paths.push(path);
        }
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert!(!paths.iter().any(|p| p.contains("/dist")));
    }

    #[test]
    fn platform_package_carries_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let packaged = packager
            .package(&demo_bundle(), PackageFormat::PlatformPackage, PackageOptions::default())
            .unwrap();
        assert!(packaged.file_name().ends_with(".agentpkg"));
        let descriptor = packaged.descriptor.clone().unwrap();
        assert_eq!(descriptor.entry_point, "agents.demo_bundle");

        let out = tempfile::tempdir().unwrap();
        let extracted = extract_tree(&packaged.path, out.path(), true).unwrap();
        assert_eq!(extracted.descriptor, Some(descriptor));
    }

    #[test]
    fn extract_without_manifest_is_packaging_error() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("plain");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("file.txt"), "no manifest").unwrap();
        let out = tempfile::tempdir().unwrap();
        let err = extract(&tree, out.path(), false).unwrap_err();
        assert!(matches!(err, AbgError::Packaging { ref stage, .. } if stage == "manifest lookup"));
    }

    #[test]
    fn extract_validation_catches_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let options = PackageOptions {
            cleanup: false,
            ..PackageOptions::default()
        };
        let packaged = packager
            .package(&demo_bundle(), PackageFormat::Directory, options)
            .unwrap();
        fs::write(packaged.path.join("agents/echo_agent.md"), "tampered").unwrap();

        let out = tempfile::tempdir().unwrap();
        let err = extract(&packaged.path, out.path(), true).unwrap_err();
        assert!(matches!(err, AbgError::ChecksumMismatch { ref path, .. } if path == "agents/echo_agent.md"));

        let out = tempfile::tempdir().unwrap();
        let bundle = extract(&packaged.path, out.path(), false).unwrap();
        assert_eq!(bundle.agents[0].content, "tampered");
    }

    #[test]
    fn package_tree_refreshes_manifest_for_edits() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let tree = packager
            .package(&demo_bundle(), PackageFormat::Directory, PackageOptions::default())
            .unwrap()
            .path;
        fs::write(tree.join("docs/echo_agent.md"), "# edited docs\n").unwrap();
        let baseline = fs::read(tree.join(MANIFEST_FILE)).unwrap();

        let archives = tempfile::tempdir().unwrap();
        let packaged = Packager::new(archives.path())
            .unwrap()
            .package_tree(&tree, PackageFormat::Zip, PackageOptions::default())
            .unwrap();
        assert!(tree.exists());
        assert_eq!(fs::read(tree.join(MANIFEST_FILE)).unwrap(), baseline);

        let out = tempfile::tempdir().unwrap();
        let extracted = extract_tree(&packaged.path, out.path(), true).unwrap();
        assert_eq!(
            fs::read_to_string(extracted.root.join("docs/echo_agent.md")).unwrap(),
            "# edited docs\n"
        );
    }

    #[test]
    fn extract_into_populated_directory_returns_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let installed = dir.path().join("installed");
        Assembler::new(&installed)
            .unwrap()
            .with_options(AssembleOptions { prebuild: false })
            .assemble(&demo_bundle())
            .unwrap();
        // A manifest at the top of the target as well.
        fs::copy(
            installed.join("demo_bundle-1.0.0").join(MANIFEST_FILE),
            installed.join(MANIFEST_FILE),
        )
        .unwrap();

        let mut newer = demo_bundle();
        newer.version = "2.0.0".to_string();
        newer.agents.push(newer.agents[0].clone());
        newer.agents[1].name = "second_agent".to_string();
        let archives = tempfile::tempdir().unwrap();
        let packaged = Packager::new(archives.path())
            .unwrap()
            .package(&newer, PackageFormat::TarGz, PackageOptions::default())
            .unwrap();

        let extracted = extract_tree(&packaged.path, &installed, true).unwrap();
        assert_eq!(extracted.root, installed.join("demo_bundle-2.0.0"));
        assert_eq!(extracted.bundle.version, "2.0.0");
        assert_eq!(extracted.bundle.agents.len(), 2);
        assert!(installed.join("demo_bundle-1.0.0").join(MANIFEST_FILE).is_file());

        let leftovers: Vec<_> = fs::read_dir(&installed)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".abg-extract-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_validation_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let options = PackageOptions {
            cleanup: false,
            ..PackageOptions::default()
        };
        let packaged = packager
            .package(&demo_bundle(), PackageFormat::Directory, options)
            .unwrap();
        fs::write(packaged.path.join("agents/echo_agent.md"), "tampered").unwrap();

        let out = tempfile::tempdir().unwrap();
        assert!(extract(&packaged.path, out.path(), true).is_err());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn package_tree_refuses_to_overwrite_its_source() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let tree = packager
            .package(&demo_bundle(), PackageFormat::Directory, PackageOptions::default())
            .unwrap()
            .path;
        let err = packager
            .package_tree(&tree, PackageFormat::Directory, PackageOptions::default())
            .unwrap_err();
        assert!(matches!(err, AbgError::Validation(_)));
    }

    #[test]
    fn inspect_rebuilds_packaged_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path()).unwrap();
        let packaged = packager
            .package(&demo_bundle(), PackageFormat::Zip, PackageOptions::default())
            .unwrap();
        let inspected = inspect(&packaged.path).unwrap();
        assert_eq!(inspected.checksum, packaged.checksum);
        assert_eq!(inspected.size_bytes, packaged.size_bytes);
        assert_eq!(inspected.bundle.name, "demo_bundle");
        assert_eq!(inspected.default_repository(), "agent-bundle-demo_bundle");
    }
}
