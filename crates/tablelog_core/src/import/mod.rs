//! Conversions that produce or rewrite change logs.
//!
//! # Responsibility
//! - Turn authored table documents into changes (`authored`).
//! - Rewrite early log shapes into the current shape (`legacy`).
//! - Export the shareable document form (`export`).
//! - Copy-time and snapshot helpers over whole logs (`snapshot`).
//!
//! # Invariants
//! - Every function here is pure; none touches a live `TableContent`.
//! - Migration and import are idempotent in the value sense.

pub mod authored;
pub mod export;
pub mod legacy;
pub mod snapshot;

pub use authored::{convert_import_to_changes, parse_authored_table, AuthoredColumn, AuthoredTable};
pub use export::{shareable_snapshot, shareable_snapshot_json};
pub use legacy::{is_migration_required, migrate_changes};
pub use snapshot::{convert_changes_to_snapshot, remap_tile_ids, LogSnapshot};
