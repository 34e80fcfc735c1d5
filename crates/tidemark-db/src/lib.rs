pub mod migrator;
pub mod registry;
pub mod status;
pub mod version_store;

pub use migrator::{Direction, MigrationReport, Migrator, Plan, compute_plan};
pub use registry::{
    Action, ActionResult, FLOOR_VERSION, Migration, RegisteredMigration, RegistrationError,
    Registry,
};
pub use status::{StatusEntry, StatusReport};
pub use version_store::{AppliedVersion, VersionStore};
