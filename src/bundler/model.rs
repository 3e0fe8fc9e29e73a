//! In-memory bundle of generated agents, as handed over by the generation pipeline.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AbgError, Result};

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_AGENTS: usize = 10;
pub const MIN_AGENT_CONTENT: usize = 100;

/// Lifecycle of a bundle inside the generation pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for BundleStatus {
    type Err = AbgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(AbgError::Validation(format!("unknown bundle status: {other}"))),
        }
    }
}

/// One generated agent: markdown content plus descriptive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAgent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_agent_type", rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_agent_type() -> String {
    "specialized".to_string()
}

fn default_model() -> String {
    "inherit".to_string()
}

impl GeneratedAgent {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_type: default_agent_type(),
            role: String::new(),
            description: String::new(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
            content: content.into(),
            tests: None,
            documentation: None,
            model: default_model(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tests(mut self, tests: impl Into<String>) -> Self {
        self.tests = Some(tests.into());
        self
    }

    #[must_use]
    pub fn with_documentation(mut self, docs: impl Into<String>) -> Self {
        self.documentation = Some(docs.into());
        self
    }

    /// Relative path of the agent file inside an assembled tree.
    #[must_use]
    pub fn file_path(&self) -> String {
        format!("agents/{}.md", self.name)
    }
}

/// A set of generated agents plus identity metadata. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub agents: Vec<GeneratedAgent>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: BundleStatus,
}

impl Bundle {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        agents: Vec<GeneratedAgent>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: version.into(),
            description: description.into(),
            agents,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            status: BundleStatus::Ready,
        }
    }

    /// Directory name of the assembled tree, `<name>-<version>`.
    #[must_use]
    pub fn tree_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Collect every validation problem; empty means the bundle can be assembled.
    #[must_use]
    pub fn validation_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if let Err(reason) = check_name(&self.name, MIN_NAME_LEN, MAX_NAME_LEN) {
            issues.push(format!("bundle name '{}' {reason}", self.name));
        }
        if Version::parse(&self.version).is_err() {
            issues.push(format!("bundle version '{}' is not semver", self.version));
        }
        if self.agents.is_empty() {
            issues.push("bundle has no agents".to_string());
        }
        if self.agents.len() > MAX_AGENTS {
            issues.push(format!(
                "bundle has {} agents (max {MAX_AGENTS})",
                self.agents.len()
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if let Err(reason) = check_name(&agent.name, 1, MAX_NAME_LEN) {
                issues.push(format!("agent name '{}' {reason}", agent.name));
            }
            if !seen.insert(agent.name.as_str()) {
                issues.push(format!("duplicate agent name '{}'", agent.name));
            }
            let len = agent.content.trim().chars().count();
            if len < MIN_AGENT_CONTENT {
                issues.push(format!(
                    "agent '{}' content is {len} chars (min {MIN_AGENT_CONTENT})",
                    agent.name
                ));
            }
        }

        issues
    }

    pub fn validate(&self) -> Result<()> {
        let issues = self.validation_issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(AbgError::Validation(issues.join("; ")))
        }
    }
}

fn check_name(name: &str, min: usize, max: usize) -> std::result::Result<(), String> {
    let len = name.chars().count();
    if len < min || len > max {
        return Err(format!("must be {min}-{max} characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("may only contain letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}
