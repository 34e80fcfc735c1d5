use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version_store::AppliedVersion;

/// One registered migration and whether the database has it applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub version: String,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Read-only checklist of registered migrations, in version order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    /// Applied rows with no registered migration.
    pub orphaned: Vec<AppliedVersion>,
}

impl StatusReport {
    pub fn applied_count(&self) -> usize {
        self.entries.iter().filter(|e| e.applied).count()
    }

    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| !e.applied)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let mark = if entry.applied { "x" } else { " " };
            writeln!(f, "[{mark}] {} {}", entry.version, entry.name)?;
        }
        for row in &self.orphaned {
            writeln!(f, "[?] {} {} (not registered)", row.version, row.name)?;
        }
        Ok(())
    }
}
