//! Text generated into assembled trees, repositories and releases.

use crate::bundler::manifest::BuildDescriptor;
use crate::bundler::model::{Bundle, GeneratedAgent};
use crate::bundler::package::PackagedBundle;

fn agent_list(agents: &[GeneratedAgent]) -> String {
    agents
        .iter()
        .map(|agent| {
            if agent.role.is_empty() {
                format!("- **{}**", agent.name)
            } else {
                format!("- **{}**: {}", agent.name, agent.role)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn size_kib(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let kib = bytes as f64 / 1024.0;
    format!("{kib:.1} KB")
}

pub fn readme(bundle: &Bundle) -> String {
    let descriptor = BuildDescriptor::for_bundle(bundle);
    format!(
        "# {name}\n\n\
{description}\n\n\
## Quick Start\n\n\
```bash\n\
{install}\n\
```\n\n\
See [INSTRUCTIONS.md](INSTRUCTIONS.md) for usage details.\n\n\
## Agents\n\n\
{agents}\n\n\
## Repackaging\n\n\
After editing files in this directory, rebuild the archive:\n\n\
```bash\n\
./repackage.sh          # POSIX shells\n\
pwsh ./repackage.ps1    # PowerShell\n\
```\n\n\
Edited files are detected on update and are never overwritten silently.\n\n\
---\n\n\
Bundle ID: {id}\n\
Version: {version}\n",
        name = bundle.name,
        description = bundle.description,
        install = descriptor.install_command,
        agents = agent_list(&bundle.agents),
        id = bundle.id,
        version = bundle.version,
    )
}

pub fn instructions(bundle: &Bundle) -> String {
    let mut out = format!(
        "# Using {name}\n\n\
## Layout\n\n\
- `agents/` agent definitions, one markdown file per agent\n\
- `tests/` test scenarios shipped with each agent\n\
- `docs/` per-agent documentation\n\
- `config/bundle_config.json` runtime settings (enabled agents, default model)\n\
- `manifest.json` checksums of every shipped file\n\n\
## Enabling agents\n\n\
Edit `enabled_agents` in `config/bundle_config.json`. Remove an entry to disable that agent.\n\n\
## Agents\n",
        name = bundle.name
    );
    for agent in &bundle.agents {
        out.push_str(&format!("\n### {}\n\n", agent.name));
        if !agent.description.is_empty() {
            out.push_str(&agent.description);
            out.push_str("\n\n");
        }
        if !agent.capabilities.is_empty() {
            out.push_str(&format!("Capabilities: {}\n\n", agent.capabilities.join(", ")));
        }
        out.push_str(&format!("File: `{}`\n", agent.file_path()));
    }
    out.push_str(
        "\n## Updating\n\n\
```bash\n\
abg update check . --repository <owner/repo>\n\
abg update apply . --repository <owner/repo>\n\
```\n\n\
Files you changed are kept. Files changed both here and upstream are listed as conflicts.\n",
    );
    out
}

pub fn agent_docs(agent: &GeneratedAgent) -> String {
    match &agent.documentation {
        Some(docs) => docs.clone(),
        None => {
            let mut out = format!("# {}\n\n", agent.name);
            if !agent.role.is_empty() {
                out.push_str(&format!("**Role:** {}\n\n", agent.role));
            }
            if !agent.description.is_empty() {
                out.push_str(&agent.description);
                out.push_str("\n\n");
            }
            if !agent.capabilities.is_empty() {
                out.push_str("## Capabilities\n\n");
                for capability in &agent.capabilities {
                    out.push_str(&format!("- {capability}\n"));
                }
                out.push('\n');
            }
            if !agent.dependencies.is_empty() {
                out.push_str(&format!("Depends on: {}\n", agent.dependencies.join(", ")));
            }
            out
        }
    }
}

pub fn repackage_sh(bundle: &Bundle) -> String {
    format!(
        "#!/bin/sh\n\
# Rebuild {tree} from this directory.\n\
set -eu\n\
HERE=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n\
FORMAT=\"${{1:-tar-gz}}\"\n\
OUT=\"${{2:-$HERE/..}}\"\n\
exec abg package --from-dir \"$HERE\" --format \"$FORMAT\" --output \"$OUT\"\n",
        tree = bundle.tree_name()
    )
}

pub fn repackage_ps1(bundle: &Bundle) -> String {
    format!(
        "#!/usr/bin/env pwsh\n\
# Rebuild {tree} from this directory.\n\
param(\n\
    [string]$Format = \"tar-gz\",\n\
    [string]$Output = (Join-Path $PSScriptRoot \"..\")\n\
)\n\
$ErrorActionPreference = \"Stop\"\n\
& abg package --from-dir $PSScriptRoot --format $Format --output $Output\n\
exit $LASTEXITCODE\n",
        tree = bundle.tree_name()
    )
}

pub fn repository_readme(package: &PackagedBundle, owner: Option<&str>) -> String {
    let bundle = &package.bundle;
    format!(
        "# {name}\n\n\
{description}\n\n\
## Installation\n\n\
```bash\n\
abg download {owner}/{repo} ./bundles\n\
```\n\n\
## Agents\n\n\
This bundle contains {count} agents:\n\n\
{agents}\n\n\
## Bundle Information\n\n\
- **Version**: {version}\n\
- **Format**: {format}\n\
- **Size**: {size}\n\
- **Checksum**: `{checksum}`\n",
        name = bundle.name,
        description = bundle.description,
        owner = owner.unwrap_or("<owner>"),
        repo = package.default_repository(),
        count = bundle.agents.len(),
        agents = agent_list(&bundle.agents),
        version = bundle.version,
        format = package.format,
        size = size_kib(package.size_bytes),
        checksum = package.checksum,
    )
}

pub fn release_notes(package: &PackagedBundle) -> String {
    let bundle = &package.bundle;
    let agents = bundle
        .agents
        .iter()
        .map(|agent| format!("- {}: {}", agent.name, agent.role))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "## {name} v{version}\n\n\
### Bundle Contents\n\n\
- **Agents**: {count}\n\
- **Package Format**: {format}\n\
- **Package Size**: {size}\n\n\
### Agents Included\n\n\
{agents}\n\n\
### Checksum\n\n\
```\n\
{checksum}\n\
```\n",
        name = bundle.name,
        version = bundle.version,
        count = bundle.agents.len(),
        format = package.format,
        size = size_kib(package.size_bytes),
        checksum = package.checksum,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Bundle {
        let agent = GeneratedAgent::new("echo_agent", "x".repeat(120))
            .with_role("Echoes input")
            .with_capabilities(["echo", "repeat"]);
        Bundle::new("demo_bundle", "1.0.0", "A demo bundle", vec![agent])
    }

    #[test]
    fn readme_lists_agents_and_install() {
        let text = readme(&bundle());
        assert!(text.starts_with("# demo_bundle"));
        assert!(text.contains("- **echo_agent**: Echoes input"));
        assert!(text.contains("abg install demo_bundle"));
    }

    #[test]
    fn scripts_reinvoke_packaging() {
        let sh = repackage_sh(&bundle());
        assert!(sh.starts_with("#!/bin/sh"));
        assert!(sh.contains("abg package --from-dir"));
        let ps = repackage_ps1(&bundle());
        assert!(ps.contains("abg package --from-dir $PSScriptRoot"));
    }

    #[test]
    fn generated_docs_fall_back_to_agent_fields() {
        let agent = GeneratedAgent::new("a", "c").with_capabilities(["one"]);
        assert!(agent_docs(&agent).contains("- one"));
        let documented = agent.with_documentation("custom docs");
        assert_eq!(agent_docs(&documented), "custom docs");
    }

    #[test]
    fn instructions_mention_every_agent_file() {
        let text = instructions(&bundle());
        assert!(text.contains("`agents/echo_agent.md`"));
        assert!(text.contains("Capabilities: echo, repeat"));
    }
}
