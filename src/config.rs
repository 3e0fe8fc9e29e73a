use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::bundler::package::{PackageFormat, PackageOptions};
use crate::error::{AbgError, Result};
use crate::utils::fs::read_optional;

/// Project-local configuration directory.
const PROJECT_CONFIG_DIR: &str = ".abg";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub packaging: PackagingConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub update: UpdateConfig,
}

impl Config {
    /// Defaults, then the global file, the project file, the explicit file
    /// (`--config` or `ABG_CONFIG`), then `ABG_*` environment overrides.
    ///
    /// Files are partial: a later layer only replaces the keys it names.
    pub fn load(explicit_path: Option<&Path>, project_root: &Path) -> Result<Self> {
        let mut layers = Vec::new();
        if let Some(global) = Self::global_path() {
            layers.extend(Self::load_layer(&global)?);
        }
        layers.extend(Self::load_layer(&Self::project_path(project_root))?);

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("ABG_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = explicit {
            let layer = Self::load_layer(&path)?.ok_or_else(|| {
                AbgError::MissingConfig(format!("config file {} not found", path.display()))
            })?;
            layers.push(layer);
        }

        let mut config = Self::from_layers(layers)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Location of the per-user config file, if the platform has one.
    #[must_use]
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("abg/config.toml"))
    }

    #[must_use]
    pub fn project_path(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_CONFIG_DIR).join("config.toml")
    }

    fn load_layer(path: &Path) -> Result<Option<Table>> {
        let Some(raw) = read_optional(path)
            .map_err(|err| AbgError::Config(format!("read config {}: {err}", path.display())))?
        else {
            return Ok(None);
        };
        let layer = toml::from_str(&raw)
            .map_err(|err| AbgError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(layer))
    }

    fn from_layers(layers: impl IntoIterator<Item = Table>) -> Result<Self> {
        let mut merged = Table::new();
        for layer in layers {
            merge_tables(&mut merged, layer);
        }
        Value::Table(merged)
            .try_into()
            .map_err(|err| AbgError::Config(format!("invalid config: {err}")))
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let env = Env(&lookup);

        if let Some(value) = env.string("ABG_OUTPUT_DIR") {
            self.packaging.output_dir = PathBuf::from(value);
        }
        if let Some(value) = env.string("ABG_DEFAULT_FORMAT") {
            self.packaging.default_format = value
                .parse()
                .map_err(|_| AbgError::Config(format!("invalid ABG_DEFAULT_FORMAT value {value}")))?;
        }
        if let Some(value) = env.bool("ABG_CLEANUP") {
            self.packaging.cleanup = value;
        }
        if let Some(value) = env.bool("ABG_PREBUILD") {
            self.packaging.prebuild = value;
        }

        if let Some(value) = env.string("ABG_GITHUB_ORG") {
            self.distribution.github_org = Some(value).filter(|org| !org.is_empty());
        }
        if let Some(value) = env.string("ABG_DEFAULT_BRANCH") {
            self.distribution.default_branch = value;
        }
        if let Some(value) = env.bool("ABG_PUBLIC") {
            self.distribution.public = value;
        }
        if let Some(value) = env.u32("ABG_QUOTA_LIMIT")? {
            self.distribution.quota_limit = value;
        }
        if let Some(value) = env.u64("ABG_QUOTA_WINDOW_SECS")? {
            self.distribution.quota_window_seconds = value;
        }
        if let Some(value) = env.string("ABG_GH_BIN") {
            self.distribution.gh_bin = value;
        }
        if let Some(value) = env.string("ABG_GIT_BIN") {
            self.distribution.git_bin = value;
        }

        if let Some(value) = env.u64("ABG_TIMEOUT_METADATA_SECS")? {
            self.timeouts.metadata_seconds = value;
        }
        if let Some(value) = env.u64("ABG_TIMEOUT_CLONE_SECS")? {
            self.timeouts.clone_seconds = value;
        }
        if let Some(value) = env.u64("ABG_TIMEOUT_PUSH_SECS")? {
            self.timeouts.push_seconds = value;
        }

        if let Some(value) = env.bool("ABG_BACKUP") {
            self.update.backup = value;
        }
        if let Some(value) = env.bool("ABG_PRESERVE_EDITS") {
            self.update.preserve_edits = value;
        }

        Ok(())
    }
}

/// Recursive merge: tables merge key by key, anything else is replaced.
fn merge_tables(base: &mut Table, layer: Table) {
    for (key, value) in layer {
        match value {
            Value::Table(incoming) => {
                if let Some(Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, Value::Table(incoming));
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    pub output_dir: PathBuf,
    pub default_format: PackageFormat,
    pub cleanup: bool,
    /// Build the platform package next to every assembled tree.
    pub prebuild: bool,
    pub compression_level: u32,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./packages"),
            default_format: PackageFormat::TarGz,
            cleanup: true,
            prebuild: true,
            compression_level: 6,
        }
    }
}

impl PackagingConfig {
    #[must_use]
    pub fn package_options(&self) -> PackageOptions {
        PackageOptions {
            cleanup: self.cleanup,
            compression_level: self.compression_level.min(9),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Owner for new repositories; the authenticated account when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_org: Option<String>,
    pub default_branch: String,
    pub public: bool,
    pub quota_limit: u32,
    pub quota_window_seconds: u64,
    pub gh_bin: String,
    pub git_bin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_email: Option<String>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            github_org: None,
            default_branch: "main".to_string(),
            public: true,
            quota_limit: 5000,
            quota_window_seconds: 3600,
            gh_bin: "gh".to_string(),
            git_bin: "git".to_string(),
            commit_author: None,
            commit_email: None,
        }
    }
}

/// Per-stage deadlines for external commands, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub metadata_seconds: u64,
    pub create_seconds: u64,
    pub clone_seconds: u64,
    pub push_seconds: u64,
    pub release_seconds: u64,
    pub download_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            metadata_seconds: 30,
            create_seconds: 60,
            clone_seconds: 120,
            push_seconds: 120,
            release_seconds: 120,
            download_seconds: 300,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_seconds)
    }

    #[must_use]
    pub const fn create(&self) -> Duration {
        Duration::from_secs(self.create_seconds)
    }

    #[must_use]
    pub const fn repo_clone(&self) -> Duration {
        Duration::from_secs(self.clone_seconds)
    }

    #[must_use]
    pub const fn push(&self) -> Duration {
        Duration::from_secs(self.push_seconds)
    }

    #[must_use]
    pub const fn release(&self) -> Duration {
        Duration::from_secs(self.release_seconds)
    }

    #[must_use]
    pub const fn download(&self) -> Duration {
        Duration::from_secs(self.download_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub backup: bool,
    pub preserve_edits: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            backup: true,
            preserve_edits: true,
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.string(key)
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }

    fn u32(&self, key: &str) -> Result<Option<u32>> {
        self.string(key)
            .map(|value| {
                value
                    .parse::<u32>()
                    .map_err(|err| AbgError::Config(format!("invalid {key} value {value}: {err}")))
            })
            .transpose()
    }

    fn u64(&self, key: &str) -> Result<Option<u64>> {
        self.string(key)
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|err| AbgError::Config(format!("invalid {key} value {value}: {err}")))
            })
            .transpose()
    }
}
