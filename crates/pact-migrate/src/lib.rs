//! # Pact Migrate
//!
//! Forward-only container schema migrations, applied exactly once across
//! however many replicas start up concurrently.
//!
//! Every replica runs [`Migrator::migrate`] at host start. A momentary lock
//! serializes the decision to start the next migration, a double-checked
//! count of the append-only [`MigrationRecord`] collection eliminates
//! redundant applications, and each migration is an idempotent, determinate
//! mutation of the container's schema properties.

pub mod migrator;
pub mod record;

pub use migrator::{Migration, Migrator};
pub use record::{MigrationRecord, MIGRATIONS_PARTITION};
