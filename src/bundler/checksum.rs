//! Tagged sha256 digests for single files and whole trees.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{AbgError, Result};

pub const ALGORITHM_PREFIX: &str = "sha256:";
const CHUNK_SIZE: usize = 64 * 1024;

/// A `sha256:<hex>` digest string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    fn from_digest(digest: impl AsRef<[u8]>) -> Self {
        Self(format!("{ALGORITHM_PREFIX}{}", hex::encode(digest)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part without the algorithm tag.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0[ALGORITHM_PREFIX.len()..]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Checksum {
    type Err = AbgError;

    fn from_str(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix(ALGORITHM_PREFIX).ok_or_else(|| {
            AbgError::Validation(format!("checksum '{s}' is missing the {ALGORITHM_PREFIX} tag"))
        })?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AbgError::Validation(format!(
                "checksum '{s}' is not a 64-digit hex sha256"
            )));
        }
        Ok(Self(format!("{ALGORITHM_PREFIX}{}", hex_part.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Checksum {
    type Error = AbgError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Checksum {
    Checksum::from_digest(Sha256::digest(bytes))
}

/// Hash one file, streaming it in fixed chunks.
pub fn hash_file(path: &Path) -> Result<Checksum> {
    if path.is_dir() {
        return Err(AbgError::Validation(format!(
            "expected a file but {} is a directory",
            path.display()
        )));
    }
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Checksum::from_digest(hasher.finalize()))
}

/// Relative paths (forward slashes) of every regular file under `root`, sorted.
///
/// Symlinks are not followed and not listed.
pub fn tree_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| {
            AbgError::Io(std::io::Error::other(format!(
                "walk {}: {err}",
                root.display()
            )))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        files.push(relative_slash_path(root, entry.path())?);
    }
    files.sort();
    Ok(files)
}

/// Hash a whole tree. Relative paths are sorted before folding, so the digest
/// does not depend on directory iteration order.
pub fn hash_tree(root: &Path) -> Result<Checksum> {
    if !root.is_dir() {
        return Err(AbgError::Validation(format!(
            "expected a directory but {} is not one",
            root.display()
        )));
    }
    let mut hasher = Sha256::new();
    for rel in tree_files(root)? {
        let digest = hash_file(&root.join(&rel))?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.hex().as_bytes());
        hasher.update(b"\n");
    }
    Ok(Checksum::from_digest(hasher.finalize()))
}

/// Hash a file or, for a directory, its tree.
pub fn hash_path(path: &Path) -> Result<Checksum> {
    if path.is_dir() {
        hash_tree(path)
    } else {
        hash_file(path)
    }
}

pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        AbgError::Validation(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
