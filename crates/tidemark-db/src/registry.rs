use std::collections::BTreeMap;
use std::fmt;

use rusqlite::Transaction;
use thiserror::Error;

use crate::migrator::Direction;

/// Version of the no-op migration every registry starts with. It sorts before
/// any fixed-width timestamp version and marks the "nothing applied" state.
pub const FLOOR_VERSION: &str = "00010101T000000Z";

const FLOOR_NAME: &str = "nil";

/// Result returned by a migration body. Boxed so bodies can use `?` on
/// `rusqlite::Error` as well as their own error types.
pub type ActionResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A migration body, run against the transaction that also records it.
pub type Action = Box<dyn Fn(&Transaction<'_>) -> ActionResult + Send + Sync>;

/// Reasons a migration cannot be added to a [`Registry`]. These are authoring
/// mistakes, so hosts usually abort startup when they see one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("migration {0} has no up action")]
    MissingUp(String),

    #[error("migration {0} has no down action")]
    MissingDown(String),

    #[error("migration version cannot be empty")]
    EmptyVersion,

    #[error("migration {0} is already registered")]
    Duplicate(String),
}

impl From<RegistrationError> for tidemark_common::Error {
    fn from(e: RegistrationError) -> Self {
        tidemark_common::Error::Registration(e.to_string())
    }
}

/// A migration under construction. Both actions must be set before the
/// registry will accept it.
pub struct Migration {
    version: String,
    name: String,
    up: Option<Action>,
    down: Option<Action>,
}

impl Migration {
    pub fn new(version: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            up: None,
            down: None,
        }
    }

    pub fn up<F>(mut self, action: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> ActionResult + Send + Sync + 'static,
    {
        self.up = Some(Box::new(action));
        self
    }

    pub fn down<F>(mut self, action: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> ActionResult + Send + Sync + 'static,
    {
        self.down = Some(Box::new(action));
        self
    }

    /// Convenience for migrations that are plain SQL batches in both directions.
    pub fn sql(
        version: impl Into<String>,
        name: impl Into<String>,
        up_sql: &'static str,
        down_sql: &'static str,
    ) -> Self {
        Self::new(version, name)
            .up(move |tx| Ok(tx.execute_batch(up_sql)?))
            .down(move |tx| Ok(tx.execute_batch(down_sql)?))
    }
}

/// A validated migration held by the registry.
pub struct RegisteredMigration {
    name: String,
    up: Action,
    down: Action,
}

impl RegisteredMigration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn action(&self, direction: Direction) -> &Action {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

impl fmt::Debug for RegisteredMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredMigration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Every migration the host knows about, keyed by version.
///
/// Built once at startup and then lent to a [`crate::Migrator`]. Versions are
/// compared as plain strings, so they must be fixed-width (for example
/// `20200101T000000Z`) for string order to match the intended order.
#[derive(Debug)]
pub struct Registry {
    migrations: BTreeMap<String, RegisteredMigration>,
}

impl Registry {
    /// Create a registry holding only the floor migration.
    pub fn new() -> Self {
        let mut migrations = BTreeMap::new();
        migrations.insert(
            FLOOR_VERSION.to_string(),
            RegisteredMigration {
                name: FLOOR_NAME.to_string(),
                up: Box::new(|_| Ok(())),
                down: Box::new(|_| Ok(())),
            },
        );
        Self { migrations }
    }

    pub fn register(&mut self, migration: Migration) -> Result<(), RegistrationError> {
        let Migration {
            version,
            name,
            up,
            down,
        } = migration;

        if version.is_empty() {
            return Err(RegistrationError::EmptyVersion);
        }
        let up = up.ok_or_else(|| RegistrationError::MissingUp(version.clone()))?;
        let down = down.ok_or_else(|| RegistrationError::MissingDown(version.clone()))?;
        if self.migrations.contains_key(&version) {
            return Err(RegistrationError::Duplicate(version));
        }

        self.migrations
            .insert(version, RegisteredMigration { name, up, down });
        Ok(())
    }

    /// Registered versions in ascending order.
    pub fn sorted_versions(&self) -> Vec<String> {
        self.migrations.keys().cloned().collect()
    }

    pub fn get(&self, version: &str) -> Option<&RegisteredMigration> {
        self.migrations.get(version)
    }

    pub fn contains(&self, version: &str) -> bool {
        self.migrations.contains_key(version)
    }

    /// The greatest registered version.
    pub fn latest(&self) -> &str {
        self.migrations
            .keys()
            .next_back()
            .map(String::as_str)
            .unwrap_or(FLOOR_VERSION)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
