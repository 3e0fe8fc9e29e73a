//! Per-invocation state shared by every command.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    /// Emit JSON on stdout instead of human text.
    pub robot_mode: bool,
    /// Directory whose `.abg/config.toml` was consulted.
    pub project_root: PathBuf,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let project_root = std::env::current_dir()?;
        let config = Config::load(cli.config.as_deref(), &project_root)?;
        Ok(Self {
            config,
            robot_mode: cli.json,
            project_root,
        })
    }
}
