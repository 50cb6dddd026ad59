//! Command-line argument structures and enums

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codesync")]
#[command(version)]
#[command(about = "Share a text file live between a host and a remote surface", long_about = None)]
pub struct Cli {
    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the minimal change list that turns one file into another
    Diff {
        /// File with the old content
        before: PathBuf,

        /// File with the new content
        after: PathBuf,

        /// Print compact JSON on one line
        #[arg(long)]
        compact: bool,
    },

    /// Host a file over stdin/stdout, one JSON sync message per line
    Host {
        /// File to share
        file: PathBuf,

        /// Resource path announced to the peer (defaults to FILE as given)
        #[arg(long)]
        resource: Option<String>,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
