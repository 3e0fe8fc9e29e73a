//! abg - Agent bundle generator
//!
//! Package generated agent bundles, publish them to a repository host and
//! merge upstream updates into installed copies.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use abg::app::AppContext;
use abg::cli::Cli;
use abg::cli::output::ErrorEnvelope;
use abg::{AbgError, Result};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            report(&cli, &e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let ctx = AppContext::from_cli(cli)?;
    abg::cli::commands::run(&ctx, &cli.command)
}

fn report(cli: &Cli, e: &AbgError) {
    if cli.json {
        // JSON error envelope on stdout
        let envelope = ErrorEnvelope::from(e);
        println!("{}", serde_json::to_string(&envelope).unwrap_or_default());
    } else {
        eprintln!("Error: {e}");
        let suggestion = e.to_structured().suggestion;
        if !suggestion.is_empty() {
            eprintln!("  hint: {suggestion}");
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn,abg=info",
            1 => "info,abg=debug",
            _ => "debug,abg=trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
