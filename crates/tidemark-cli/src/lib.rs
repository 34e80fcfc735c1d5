//! Command runner for host applications.
//!
//! A host builds its [`Registry`] and hands it over from `main`:
//!
//! ```no_run
//! use tidemark_db::{Migration, Registry};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut registry = Registry::new();
//!     registry.register(Migration::sql(
//!         "20240101T000000Z",
//!         "create_notes",
//!         "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);",
//!         "DROP TABLE notes;",
//!     ))?;
//!     tidemark_cli::run(registry)
//! }
//! ```

pub mod cli;
pub mod logging;

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::Connection;
use tidemark_config::{AppConfig, ConfigLoader, LogFormat};
use tidemark_db::{Migrator, Registry};
use tracing::info;

pub use cli::{Cli, Command, LogFormatArg};

/// Parse the process arguments and run the requested command.
pub fn run(registry: Registry) -> Result<()> {
    run_with(Cli::parse(), &registry)
}

pub fn run_with(cli: Cli, registry: &Registry) -> Result<()> {
    let config = resolve_config(&cli)?;
    logging::init(&config.log);

    let stdout = std::io::stdout();
    execute(&cli.command, &config, registry, &mut stdout.lock())
}

/// Merge the config file (if any) with command-line overrides.
pub fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config =
        ConfigLoader::load_or_default(cli.config.as_deref()).context("failed to load config")?;

    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = match format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        };
    }
    Ok(config)
}

/// Run one command against the configured database, writing its output to `out`.
pub fn execute(
    command: &Command,
    config: &AppConfig,
    registry: &Registry,
    out: &mut impl Write,
) -> Result<()> {
    let mut conn = open_database(&config.database.path, config.database.busy_timeout_ms)?;
    let migrator = Migrator::new(registry);

    match command {
        Command::Migrate { target } => {
            let target = target.as_deref().unwrap_or(&config.migrate.target);
            let report = migrator
                .migrate(&mut conn, target)
                .context("migration run aborted")?;

            if report.executed.is_empty() {
                writeln!(out, "already at {}", report.to)?;
            } else {
                writeln!(
                    out,
                    "migrated {} to {} ({} migration{})",
                    report.direction,
                    report.to,
                    report.executed.len(),
                    if report.executed.len() == 1 { "" } else { "s" }
                )?;
            }
        }
        Command::Status { json } => {
            let report = migrator
                .status(&conn)
                .context("failed to read migration status")?;
            if *json {
                let body =
                    serde_json::to_string_pretty(&report).context("failed to serialize status")?;
                writeln!(out, "{body}")?;
            } else {
                write!(out, "{report}")?;
            }
        }
    }

    Ok(())
}

fn open_database(path: &Path, busy_timeout_ms: Option<u64>) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    if let Some(ms) = busy_timeout_ms {
        conn.busy_timeout(Duration::from_millis(ms))
            .context("failed to set busy timeout")?;
    }
    info!("opened database at {}", path.display());
    Ok(conn)
}
