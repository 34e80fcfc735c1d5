use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "tidemark", about = "Apply or revert versioned database migrations")]
pub struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.tidemark/config.yml when present.
    #[arg(long, global = true, env = "TIDEMARK_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file, overriding the config.
    #[arg(long, global = true, env = "TIDEMARK_DATABASE")]
    pub database: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Migrate up or down to a version.
    Migrate {
        /// Target version; omit for the latest registered migration.
        #[arg(long)]
        target: Option<String>,
    },
    /// List registered migrations and whether each is applied.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}
