//! abg config - Show the effective configuration

use std::process::ExitCode;

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::emit_json;
use crate::config::Config;
use crate::error::{AbgError, Result};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the config file locations instead of the values
    #[arg(long)]
    pub path: bool,
}

#[derive(Serialize)]
struct ConfigPaths {
    global: Option<std::path::PathBuf>,
    project: std::path::PathBuf,
}

pub fn run(ctx: &AppContext, args: &ConfigArgs) -> Result<ExitCode> {
    if args.path {
        let paths = ConfigPaths {
            global: Config::global_path(),
            project: Config::project_path(&ctx.project_root),
        };
        if ctx.robot_mode {
            emit_json(&paths)?;
        } else {
            if let Some(global) = &paths.global {
                println!("{}", global.display());
            }
            println!("{}", paths.project.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    if ctx.robot_mode {
        emit_json(&ctx.config)?;
    } else {
        let rendered = toml::to_string_pretty(&ctx.config)
            .map_err(|err| AbgError::Config(format!("render config: {err}")))?;
        print!("{rendered}");
    }
    Ok(ExitCode::SUCCESS)
}
