mod cli;
mod copy;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;
use xferacct::Config;

use crate::cli::{Cli, Commands};
use crate::copy::run_copy;

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

fn print_config(config: &Config) -> Result<()> {
    let out = serde_json::to_string_pretty(config).context("Serializing config")?;
    println!("{out}");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Some(Commands::Copy(args)) => run_copy(args, config),
        Some(Commands::Config) => print_config(&config),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    });

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: bad config, 3: aborted, 4: file access, 1: other
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<xferacct::Error>() {
            return match e {
                xferacct::Error::Config { .. } | xferacct::Error::ConfigIo { .. } => 2,
                xferacct::Error::StreamClosed => 3,
                _ => 1,
            };
        }
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            return match ioe.kind() {
                NotFound | PermissionDenied | AlreadyExists => 4,
                _ => 1,
            };
        }
    }
    1
}
