//! Records written into an assembled tree: the manifest, the build descriptor,
//! the bundle config and the distributable metadata.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::bundler::checksum::Checksum;
use crate::bundler::model::{Bundle, BundleStatus, GeneratedAgent};
use crate::error::{AbgError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BUILD_DESCRIPTOR_FILE: &str = "agent-package.json";
pub const BUNDLE_CONFIG_FILE: &str = "config/bundle_config.json";
pub const DISTRIBUTABLE_METADATA_FILE: &str = "bundle.toml";
pub const FORMAT_VERSION: &str = "1.0.0";
pub const MIN_RUNTIME_VERSION: &str = "1.0.0";

/// `manifest.json`: identity, agents and per-file checksums at assembly time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub bundle: ManifestBundle,
    pub agents: Vec<ManifestAgent>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub file_checksums: BTreeMap<String, Checksum>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestBundle {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAgent {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub file: String,
}

impl Manifest {
    /// Manifest for `bundle` with the given file checksums.
    #[must_use]
    pub fn from_bundle(bundle: &Bundle, file_checksums: BTreeMap<String, Checksum>) -> Self {
        Self {
            bundle: ManifestBundle {
                id: bundle.id,
                name: bundle.name.clone(),
                version: bundle.version.clone(),
                description: bundle.description.clone(),
                created_at: bundle.created_at,
                updated_at: bundle.updated_at,
            },
            agents: bundle
                .agents
                .iter()
                .map(|agent| ManifestAgent {
                    id: agent.id,
                    name: agent.name.clone(),
                    agent_type: agent.agent_type.clone(),
                    role: agent.role.clone(),
                    capabilities: agent.capabilities.clone(),
                    dependencies: agent.dependencies.clone(),
                    file: agent.file_path(),
                })
                .collect(),
            metadata: bundle.metadata.clone(),
            file_checksums,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AbgError::ManifestMissing(path.to_path_buf())
            } else {
                AbgError::Io(err)
            }
        })?;
        serde_json::from_str(&raw).map_err(|err| AbgError::ManifestInvalid {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Load `<dir>/manifest.json`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(MANIFEST_FILE))
    }

    pub fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Replace the manifest file wholesale through a temp file and rename.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Rebuild a bundle from the manifest, reading agent content from `root`.
    pub fn to_bundle(&self, root: &Path) -> Result<Bundle> {
        let mut agents = Vec::with_capacity(self.agents.len());
        for entry in &self.agents {
            let rel = ensure_relative_path(&entry.file)?;
            let content = fs::read_to_string(root.join(rel)).map_err(|err| {
                AbgError::Packaging {
                    stage: "agent read".to_string(),
                    message: format!("{}: {err}", entry.file),
                    partial_path: None,
                }
            })?;
            let mut agent = GeneratedAgent::new(entry.name.clone(), content);
            agent.id = entry.id;
            agent.agent_type.clone_from(&entry.agent_type);
            agent.role.clone_from(&entry.role);
            agent.capabilities.clone_from(&entry.capabilities);
            agent.dependencies.clone_from(&entry.dependencies);
            agents.push(agent);
        }

        Ok(Bundle {
            id: self.bundle.id,
            name: self.bundle.name.clone(),
            version: self.bundle.version.clone(),
            description: self.bundle.description.clone(),
            agents,
            metadata: self.metadata.clone(),
            created_at: self.bundle.created_at,
            updated_at: self.bundle.updated_at,
            status: BundleStatus::Ready,
        })
    }
}

/// Reject manifest paths that could escape the tree they describe.
pub fn ensure_relative_path(rel: &str) -> Result<PathBuf> {
    let path = PathBuf::from(rel);
    let safe = !rel.is_empty()
        && path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
    if safe {
        Ok(path)
    } else {
        Err(AbgError::Validation(format!(
            "manifest path '{rel}' is not a plain relative path"
        )))
    }
}

/// `agent-package.json`, carried by platform-package artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub entry_point: String,
    pub min_runtime_version: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub install_command: String,
    pub format_version: String,
    #[serde(default)]
    pub agents: Vec<String>,
}

impl BuildDescriptor {
    #[must_use]
    pub fn for_bundle(bundle: &Bundle) -> Self {
        let mut dependencies: Vec<String> = bundle
            .agents
            .iter()
            .flat_map(|agent| agent.dependencies.iter().cloned())
            .collect();
        dependencies.sort();
        dependencies.dedup();

        Self {
            name: bundle.name.clone(),
            version: bundle.version.clone(),
            description: bundle.description.clone(),
            entry_point: format!("agents.{}", bundle.name),
            min_runtime_version: MIN_RUNTIME_VERSION.to_string(),
            dependencies,
            install_command: format!("abg install {}", bundle.name),
            format_version: FORMAT_VERSION.to_string(),
            agents: bundle.agents.iter().map(|a| a.name.clone()).collect(),
        }
    }
}

/// `config/bundle_config.json`, read by the agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleConfigFile {
    pub bundle_id: Uuid,
    pub bundle_name: String,
    pub bundle_version: String,
    pub enabled_agents: Vec<String>,
    pub default_model: String,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl BundleConfigFile {
    #[must_use]
    pub fn for_bundle(bundle: &Bundle) -> Self {
        Self {
            bundle_id: bundle.id,
            bundle_name: bundle.name.clone(),
            bundle_version: bundle.version.clone(),
            enabled_agents: bundle.agents.iter().map(|a| a.name.clone()).collect(),
            default_model: "inherit".to_string(),
            preferences: BTreeMap::new(),
            metadata: bundle.metadata.clone(),
        }
    }
}

/// `bundle.toml`, the distributable metadata at the tree root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributableMetadata {
    pub package: PackageSection,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
    pub description: String,
    pub entry_point: String,
    pub install_command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    pub file: String,
}

impl DistributableMetadata {
    #[must_use]
    pub fn for_bundle(bundle: &Bundle) -> Self {
        let descriptor = BuildDescriptor::for_bundle(bundle);
        Self {
            package: PackageSection {
                name: descriptor.name,
                version: descriptor.version,
                description: descriptor.description,
                entry_point: descriptor.entry_point,
                install_command: descriptor.install_command,
            },
            agents: bundle
                .agents
                .iter()
                .map(|agent| AgentEntry {
                    name: agent.name.clone(),
                    file: agent.file_path(),
                })
                .collect(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|err| AbgError::packaging("metadata write", format!("TOML serialize: {err}")))
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::checksum::hash_bytes;

    fn sample_bundle() -> Bundle {
        let agent = GeneratedAgent::new("echo_agent", "e".repeat(120))
            .with_role("echo")
            .with_capabilities(["repeat"]);
        Bundle::new("demo_bundle", "1.0.0", "Echo things", vec![agent])
    }

    #[test]
    fn manifest_json_has_expected_shape() {
        let bundle = sample_bundle();
        let mut checksums = BTreeMap::new();
        checksums.insert("agents/echo_agent.md".to_string(), hash_bytes(b"e"));
        let manifest = Manifest::from_bundle(&bundle, checksums);

        let value: Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(value["bundle"]["name"], "demo_bundle");
        assert_eq!(value["agents"][0]["type"], "specialized");
        assert_eq!(value["agents"][0]["file"], "agents/echo_agent.md");
        assert!(
            value["file_checksums"]["agents/echo_agent.md"]
                .as_str()
                .unwrap()
                .starts_with("sha256:")
        );
    }

    #[test]
    fn load_distinguishes_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Manifest::load_from_dir(dir.path()),
            Err(AbgError::ManifestMissing(_))
        ));
        fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(matches!(
            Manifest::load_from_dir(dir.path()),
            Err(AbgError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn write_atomic_replaces_existing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, "old").unwrap();
        let manifest = Manifest::from_bundle(&sample_bundle(), BTreeMap::new());
        manifest.write_atomic(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), manifest);
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn ensure_relative_path_rejects_escapes() {
        assert!(ensure_relative_path("agents/a.md").is_ok());
        assert!(ensure_relative_path("../a.md").is_err());
        assert!(ensure_relative_path("/etc/passwd").is_err());
        assert!(ensure_relative_path("").is_err());
    }

    #[test]
    fn descriptor_and_metadata_follow_bundle() {
        let bundle = sample_bundle();
        let descriptor = BuildDescriptor::for_bundle(&bundle);
        assert_eq!(descriptor.entry_point, "agents.demo_bundle");
        assert_eq!(descriptor.install_command, "abg install demo_bundle");

        let metadata = DistributableMetadata::for_bundle(&bundle);
        let toml = metadata.to_toml_string().unwrap();
        assert!(toml.contains("name = \"demo_bundle\""));
        assert_eq!(DistributableMetadata::from_toml_str(&toml).unwrap(), metadata);
    }
}
