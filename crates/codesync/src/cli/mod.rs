#![doc = include_str!("./README.md")]

/// Clap argument definitions
mod args;

/// Config command handlers
mod config;

/// `diff` command
mod diff;

/// `host` command: file-backed host over stdin/stdout
mod host;

use clap::Parser;
use std::path::Path;

use codesync_core::config::Config;

pub use args::Cli;
use args::Commands;

/// Load config from `path` if given, otherwise from the default location.
fn load_config(path: Option<&Path>) -> codesync_core::Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

pub fn run_cli() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let success = match cli.command {
        Commands::Diff {
            before,
            after,
            compact,
        } => diff::handle_diff(&before, &after, compact),

        Commands::Host { file, resource } => {
            match load_config(cli.config.as_deref()) {
                Ok(config) => host::handle_host(&file, resource, &config),
                Err(e) => {
                    eprintln!("✗ Failed to load config: {}", e);
                    false
                }
            }
        }

        Commands::Config { command } => config::handle_config_command(command, cli.config),
    };

    if !success {
        std::process::exit(1);
    }
}
