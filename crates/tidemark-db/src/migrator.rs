use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};
use tracing::{debug, error, info, warn};

use crate::registry::{FLOOR_VERSION, RegisteredMigration, Registry};
use crate::status::{StatusEntry, StatusReport};
use crate::version_store::VersionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// The versions one run will execute, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub direction: Direction,
    pub versions: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Pick the versions needed to move from `current` to `target`.
///
/// `registered` must be sorted ascending. An empty `target` means the
/// greatest registered version. Moving up selects `current < v <= target` in
/// ascending order; moving down selects `target < v <= current` in
/// descending order, so the target itself stays applied.
pub fn compute_plan(registered: &[String], current: &str, target: &str) -> Plan {
    let target = if target.is_empty() {
        match registered.last() {
            Some(latest) => latest.as_str(),
            None => {
                return Plan {
                    direction: Direction::Up,
                    versions: Vec::new(),
                };
            }
        }
    } else {
        target
    };

    if current > target {
        let versions = registered
            .iter()
            .rev()
            .filter(|v| v.as_str() > target && v.as_str() <= current)
            .cloned()
            .collect();
        Plan {
            direction: Direction::Down,
            versions,
        }
    } else {
        let versions = registered
            .iter()
            .filter(|v| v.as_str() > current && v.as_str() <= target)
            .cloned()
            .collect();
        Plan {
            direction: Direction::Up,
            versions,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub direction: Direction,
    /// Greatest applied version before the run; `None` for an empty store.
    pub from: Option<String>,
    /// Resolved target version.
    pub to: String,
    pub executed: Vec<String>,
}

/// Runs the migrations of a [`Registry`] against a SQLite database.
///
/// Each migration executes in its own transaction together with its
/// bookkeeping write. A failure rolls back that migration only and stops the
/// run; migrations committed earlier in the same run stay committed.
pub struct Migrator<'r> {
    registry: &'r Registry,
}

impl<'r> Migrator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Bring the database to `target`. An empty target means the latest
    /// registered version.
    pub fn migrate(&self, conn: &mut Connection, target: &str) -> Result<MigrationReport> {
        VersionStore::new(conn).ensure_schema()?;

        let current = VersionStore::new(conn).current_version()?;
        let plan = self.plan_from(current.as_deref(), target);
        let to = self.resolve_target(target).to_string();

        if plan.is_empty() {
            info!("database already at {to}, nothing to migrate");
        } else {
            info!(
                "migrating {} from {} to {to} ({} migration(s))",
                plan.direction,
                current.as_deref().unwrap_or("<none>"),
                plan.versions.len()
            );
        }

        // Plan versions are drawn from the registry, so every lookup succeeds.
        let steps = plan
            .versions
            .iter()
            .filter_map(|v| self.registry.get(v).map(|m| (v.as_str(), m)));

        let mut executed = Vec::with_capacity(plan.versions.len());
        for (version, migration) in steps {
            execute_one(conn, version, migration, plan.direction)?;
            executed.push(version.to_string());
        }

        Ok(MigrationReport {
            direction: plan.direction,
            from: current,
            to,
            executed,
        })
    }

    /// The plan `migrate` would execute for `target` against the current
    /// state of the database. Does not modify the database.
    pub fn plan(&self, conn: &Connection, target: &str) -> Result<Plan> {
        let store = VersionStore::new(conn);
        store.ensure_schema()?;
        let current = store.current_version()?;
        Ok(self.plan_from(current.as_deref(), target))
    }

    /// Report every registered version and whether it is applied.
    pub fn status(&self, conn: &Connection) -> Result<StatusReport> {
        let store = VersionStore::new(conn);
        store.ensure_schema()?;
        let applied = store.list_applied()?;

        let entries = self
            .registry
            .sorted_versions()
            .into_iter()
            .map(|version| {
                let row = applied.iter().find(|a| a.version == version);
                let name = self
                    .registry
                    .get(&version)
                    .map(|m| m.name().to_string())
                    .unwrap_or_default();
                StatusEntry {
                    applied: row.is_some(),
                    applied_at: row.map(|a| a.created_at),
                    version,
                    name,
                }
            })
            .collect();

        let orphaned: Vec<_> = applied
            .into_iter()
            .filter(|a| !self.registry.contains(&a.version))
            .collect();
        for row in &orphaned {
            warn!(
                "version {} ({}) is recorded as applied but not registered",
                row.version, row.name
            );
        }

        Ok(StatusReport { entries, orphaned })
    }

    fn resolve_target<'a>(&'a self, target: &'a str) -> &'a str {
        if target.is_empty() {
            self.registry.latest()
        } else {
            target
        }
    }

    fn plan_from(&self, current: Option<&str>, target: &str) -> Plan {
        // An empty store sits at the floor; the floor itself is never run.
        let current = current.unwrap_or(FLOOR_VERSION);
        if !self.registry.contains(current) {
            warn!("current version {current} is not registered");
        }
        if !target.is_empty() && !self.registry.contains(target) {
            warn!("target version {target} is not registered");
        }

        let plan = compute_plan(&self.registry.sorted_versions(), current, target);
        debug!("plan: {} {:?}", plan.direction, plan.versions);
        plan
    }
}

fn execute_one(
    conn: &mut Connection,
    version: &str,
    migration: &RegisteredMigration,
    direction: Direction,
) -> Result<()> {
    let tx = conn.transaction().map_err(|e| Error::Migration {
        version: version.to_string(),
        reason: format!("failed to begin transaction: {e}"),
    })?;

    if let Err(e) = (migration.action(direction))(&tx) {
        error!("error migrating {direction} {version}: {e}");
        tx.rollback().map_err(|re| Error::Migration {
            version: version.to_string(),
            reason: format!("{e}; rollback also failed: {re}"),
        })?;
        return Err(Error::Migration {
            version: version.to_string(),
            reason: e.to_string(),
        });
    }

    let store = VersionStore::new(&tx);
    let recorded = match direction {
        Direction::Up => store.record_applied(version, migration.name()),
        Direction::Down => store.record_reverted(version),
    };
    // Dropping `tx` on this path rolls the action back too.
    recorded.map_err(|e| Error::Migration {
        version: version.to_string(),
        reason: e.to_string(),
    })?;

    tx.commit().map_err(|e| Error::Migration {
        version: version.to_string(),
        reason: format!("failed to commit: {e}"),
    })?;

    match direction {
        Direction::Up => info!("applied {version} {}", migration.name()),
        Direction::Down => info!("reverted {version} {}", migration.name()),
    }
    Ok(())
}
