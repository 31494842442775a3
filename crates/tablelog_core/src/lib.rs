//! Core logic for event-sourced table tiles.
//! The change log is the single source of truth; everything else is derived
//! by replay.

pub mod config;
pub mod formula;
pub mod import;
pub mod link;
pub mod logging;
pub mod model;
pub mod replay;
pub mod service;

pub use config::TableConfig;
pub use formula::{CompiledFormula, EvalError, Expr, FormulaError, X_PLACEHOLDER};
pub use import::{
    convert_changes_to_snapshot, convert_import_to_changes, migrate_changes, remap_tile_ids,
    AuthoredColumn, AuthoredTable, LogSnapshot,
};
pub use link::{
    LabelMap, LinkableContent, LinkedChange, TileLookup, TileRegistry, TileRegistryError,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::change::{Action, Change, ChangeOp, ChangeParseError, Link, Target};
pub use model::dataset::{BeforeId, Column, ColumnId, DataSet, Row, RowId};
pub use model::metadata::Metadata;
pub use model::value::CellValue;
pub use replay::{apply_changes_to_dataset, replay, ApplyMode, ReplayStats, TableState};
pub use service::table_content::{RowValues, TableContent};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
