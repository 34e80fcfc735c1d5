use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};
use tracing::debug;

const CREATE_VERSIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);";

/// A row of the `versions` table: a migration whose up action has been
/// committed and not yet reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVersion {
    pub id: i64,
    pub version: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping queries against the `versions` table.
///
/// Borrows a connection rather than owning one, so the same store can be
/// pointed at a `Transaction` (which derefs to `Connection`) and have its
/// writes commit or roll back together with a migration body.
pub struct VersionStore<'c> {
    conn: &'c Connection,
}

impl<'c> VersionStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_VERSIONS_TABLE)
            .map_err(|e| Error::Database(format!("failed to create versions table: {e}")))
    }

    pub fn list_applied(&self) -> Result<Vec<AppliedVersion>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, version, name, created_at
                 FROM versions
                 ORDER BY version ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedVersion {
                    id: row.get(0)?,
                    version: row.get(1)?,
                    name: row.get(2)?,
                    created_at: parse_timestamp(row.get::<_, String>(3)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query versions: {e}")))?;

        let mut applied = Vec::new();
        for row in rows {
            applied.push(
                row.map_err(|e| Error::Database(format!("failed to read version row: {e}")))?,
            );
        }
        Ok(applied)
    }

    /// The greatest applied version, or `None` when nothing is recorded.
    pub fn current_version(&self) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT version FROM versions ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to query current version: {e}")))
    }

    pub fn record_applied(&self, version: &str, name: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO versions (version, name) VALUES (?1, ?2)",
                params![version, name],
            )
            .map_err(|e| Error::Database(format!("failed to record version {version}: {e}")))?;
        debug!("recorded version {version}");
        Ok(())
    }

    pub fn record_reverted(&self, version: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM versions WHERE version = ?1", params![version])
            .map_err(|e| Error::Database(format!("failed to delete version {version}: {e}")))?;
        debug!("removed {deleted} row(s) for version {version}");
        Ok(())
    }
}

/// Parse a `created_at` value written either as RFC 3339 or by SQLite's
/// `CURRENT_TIMESTAMP` ("YYYY-MM-DD HH:MM:SS", always UTC).
fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
        })
}
