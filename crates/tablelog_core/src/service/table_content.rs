//! Table content use-case service.
//!
//! # Responsibility
//! - Own one tile's change log, materialized state and configuration.
//! - Expose the mutation API; each mutation appends exactly one change.
//! - Attach link descriptors and hand appended changes to the link protocol.
//!
//! # Invariants
//! - The log is append-only; entries are never rewritten after load-time
//!   migration.
//! - Incremental application equals a full replay of `changes()`.
//! - Mutations never return errors; read-only tables ignore them.
//!
//! # See also
//! - `replay` for change semantics.
//! - `link` for partner delivery.

use crate::config::TableConfig;
use crate::formula::{canonicalize_formula, X_PLACEHOLDER};
use crate::import::authored::{convert_import_to_changes, AuthoredColumn, AuthoredTable};
use crate::import::export::{shareable_snapshot, shareable_snapshot_json};
use crate::import::legacy::migrate_changes;
use crate::link::{propagate, LabelMap, LinkedChange, TileLookup};
use crate::model::change::{Change, ChangeOp, ColumnSpec, ColumnUpdate, Link, RowSpec};
use crate::model::dataset::{BeforeId, Column, ColumnId, DataSet, RowId};
use crate::model::metadata::Metadata;
use crate::model::value::CellValue;
use crate::replay::{apply_change, replay, ApplyMode, TableState};
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Id and name of the label column added by `shared_data_set`.
pub const LABEL_COLUMN_ID: &str = "__label__";

/// Cell values for one new row, keyed by column id.
pub type RowValues = BTreeMap<ColumnId, CellValue>;

/// One table tile.
pub struct TableContent {
    changes: Vec<String>,
    state: TableState,
    config: TableConfig,
    lookup: Arc<dyn TileLookup>,
}

impl TableContent {
    /// Creates an empty table.
    pub fn new(tile_id: impl Into<String>, lookup: Arc<dyn TileLookup>, config: TableConfig) -> Self {
        Self {
            changes: Vec::new(),
            state: TableState::new(tile_id),
            config,
            lookup,
        }
    }

    /// Loads a table from a stored log.
    ///
    /// # Contract
    /// - Early entry shapes are migrated before replay.
    /// - Unparsable entries are kept in the log and skipped by replay.
    /// - Links recorded in the log are restored into metadata.
    pub fn from_log(
        tile_id: impl Into<String>,
        log: Vec<String>,
        lookup: Arc<dyn TileLookup>,
        config: TableConfig,
    ) -> Self {
        let mut content = Self::new(tile_id, lookup, config);
        content.changes = migrate_changes(&log);
        let stats = replay(&content.changes, 0, &mut content.state, ApplyMode::Full);
        info!(
            "event=table_load module=table status=ok tile_id={} entries={} applied={} skipped={}",
            content.tile_id(),
            content.changes.len(),
            stats.applied,
            stats.skipped
        );
        if content.is_linked() {
            content.lookup.note_linked_table(content.tile_id());
        }
        content
    }

    /// Creates a table from an authored document.
    pub fn from_import(
        tile_id: impl Into<String>,
        table: &AuthoredTable,
        lookup: Arc<dyn TileLookup>,
        config: TableConfig,
    ) -> Self {
        let tile_id = tile_id.into();
        let mut log = Vec::new();
        for change in convert_import_to_changes(table) {
            match change.to_json() {
                Ok(json) => log.push(json),
                Err(err) => error!(
                    "event=table_import module=table status=error tile_id={} error={}",
                    tile_id, err
                ),
            }
        }
        Self::from_log(tile_id, log, lookup, config)
    }

    /// Creates a named table with the configured default columns.
    pub fn with_default_columns(
        tile_id: impl Into<String>,
        title: impl Into<String>,
        lookup: Arc<dyn TileLookup>,
        config: TableConfig,
    ) -> Self {
        let table = AuthoredTable {
            kind: None,
            name: Some(title.into()),
            columns: Some(
                config
                    .default_column_names
                    .iter()
                    .map(|name| AuthoredColumn {
                        name: name.clone(),
                        ..AuthoredColumn::default()
                    })
                    .collect(),
            ),
        };
        Self::from_import(tile_id, &table, lookup, config)
    }

    pub fn tile_id(&self) -> &str {
        self.state.metadata.instance_id()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Serialized change log.
    pub fn changes(&self) -> &[String] {
        &self.changes
    }

    pub fn data_set(&self) -> &DataSet {
        &self.state.dataset
    }

    pub fn metadata(&self) -> &Metadata {
        &self.state.metadata
    }

    pub fn is_linked(&self) -> bool {
        self.state.metadata.is_linked()
    }

    pub fn linked_partner_ids(&self) -> &[String] {
        self.state.metadata.linked_partner_ids()
    }

    /// Position of this table in the document's link order.
    pub fn linked_table_index(&self) -> Option<usize> {
        self.lookup.linked_table_index(self.tile_id())
    }

    /// Author-facing formula for `column_id`.
    pub fn display_formula(&self, column_id: &str) -> Option<String> {
        self.state.display_formula(column_id)
    }

    pub fn set_table_name(&mut self, name: impl Into<String>) {
        self.append(
            ChangeOp::UpdateTable {
                name: Some(name.into()),
            },
            None,
        );
    }

    /// Appends a column. Returns its id, or `None` when read-only.
    pub fn add_column(&mut self, name: impl Into<String>) -> Option<ColumnId> {
        let id = Uuid::new_v4().to_string();
        let op = ChangeOp::CreateColumns {
            columns: vec![ColumnSpec::named(id.clone(), name)],
        };
        self.append(op, None).then_some(id)
    }

    pub fn rename_column(&mut self, column_id: &str, name: impl Into<String>) {
        let update = ColumnUpdate {
            name: Some(name.into()),
            ..ColumnUpdate::default()
        };
        self.append(
            ChangeOp::UpdateColumns {
                updates: vec![(column_id.to_string(), update)],
            },
            None,
        );
    }

    pub fn remove_columns(&mut self, column_ids: &[ColumnId]) {
        self.append(
            ChangeOp::DeleteColumns {
                ids: column_ids.to_vec(),
            },
            None,
        );
    }

    /// Sets an author-facing formula; an empty formula clears it.
    pub fn set_formula(&mut self, column_id: &str, raw: &str) {
        self.set_formulas(&[(column_id.to_string(), raw.to_string())]);
    }

    pub fn clear_formula(&mut self, column_id: &str) {
        self.set_formula(column_id, "");
    }

    /// Sets several author-facing formulas in one change.
    pub fn set_formulas(&mut self, formulas: &[(ColumnId, String)]) {
        let x_name = self
            .state
            .x_name()
            .unwrap_or(X_PLACEHOLDER)
            .to_string();
        let updates = formulas
            .iter()
            .map(|(column_id, raw)| {
                let raw = raw.trim();
                let expression = if raw.is_empty() {
                    String::new()
                } else {
                    canonicalize_formula(raw, &x_name)
                };
                let update = ColumnUpdate {
                    name: None,
                    expression: Some(expression),
                    raw_expression: Some(raw.to_string()),
                };
                (column_id.clone(), update)
            })
            .collect();
        self.append(ChangeOp::UpdateColumns { updates }, None);
    }

    /// Appends rows. Returns the new row ids, or `None` when read-only.
    ///
    /// # Contract
    /// - `before` anchors insertion; a missing anchor appends at the end.
    pub fn add_rows(&mut self, rows: Vec<RowValues>, before: Option<BeforeId>) -> Option<Vec<RowId>> {
        let rows: Vec<RowSpec> = rows
            .into_iter()
            .map(|values| RowSpec {
                id: Some(Uuid::new_v4().to_string()),
                values,
            })
            .collect();
        let ids = rows.iter().filter_map(|row| row.id.clone()).collect();
        let op = ChangeOp::CreateRows {
            rows,
            before_id: before,
        };
        self.append(op, None).then_some(ids)
    }

    /// Overwrites only the supplied cells of each row.
    pub fn update_rows(&mut self, updates: Vec<(RowId, RowValues)>) {
        self.append(ChangeOp::UpdateRows { updates }, None);
    }

    pub fn remove_rows(&mut self, row_ids: &[RowId]) {
        self.append(
            ChangeOp::DeleteRows {
                ids: row_ids.to_vec(),
            },
            None,
        );
    }

    /// Links a partner tile.
    ///
    /// # Contract
    /// - Returns `false` when read-only or when the table holds cells that
    ///   cannot be plotted.
    /// - Returns `true` without appending when already linked.
    pub fn add_partner_link(&mut self, partner_id: &str) -> bool {
        if self.config.read_only {
            return false;
        }
        if self.state.metadata.is_linked_to(partner_id) {
            return true;
        }
        if !self.is_valid_for_linking() {
            info!(
                "event=link_add module=table status=skip tile_id={} reason=invalid_for_linking",
                self.tile_id()
            );
            return false;
        }
        let appended = self.append(
            ChangeOp::CreateGeometryLink {
                partner_ids: vec![partner_id.to_string()],
            },
            Some(partner_id),
        );
        if appended {
            self.lookup.note_linked_table(self.tile_id());
        }
        appended
    }

    /// Unlinks a partner tile. Returns `false` when it was not linked.
    pub fn remove_partner_link(&mut self, partner_id: &str) -> bool {
        if !self.state.metadata.is_linked_to(partner_id) {
            return false;
        }
        let appended = self.append(
            ChangeOp::DeleteGeometryLink {
                partner_ids: vec![partner_id.to_string()],
            },
            None,
        );
        if appended && !self.is_linked() {
            self.lookup.note_unlinked_table(self.tile_id());
        }
        appended
    }

    /// Tears down links before the owning document drops this tile.
    ///
    /// Every remaining partner receives a Delete/GeometryLink naming this
    /// table. Nothing is appended to the log.
    pub fn will_remove_from_document(&mut self) {
        let partner_ids = self.state.metadata.linked_partner_ids().to_vec();
        if partner_ids.is_empty() {
            return;
        }
        let linked = LinkedChange {
            source_tile_id: self.tile_id().to_string(),
            link_id: Uuid::new_v4().to_string(),
            change: Change::new(ChangeOp::DeleteGeometryLink {
                partner_ids: vec![self.tile_id().to_string()],
            }),
            labels: LabelMap::default(),
            snapshot: None,
        };
        let delivered = propagate(self.lookup.as_ref(), &partner_ids, &linked);
        self.state.metadata.clear_linked_partners();
        self.lookup.note_unlinked_table(self.tile_id());
        info!(
            "event=table_remove module=table status=ok tile_id={} partners={} delivered={}",
            self.tile_id(),
            partner_ids.len(),
            delivered
        );
    }

    /// Returns whether every cell is empty or finite-numeric.
    pub fn is_valid_for_linking(&self) -> bool {
        self.state
            .dataset
            .rows()
            .iter()
            .all(|row| row.values.values().all(CellValue::is_linkable))
    }

    /// Returns whether at least one row can be plotted on two axes.
    pub fn has_linkable_rows(&self) -> bool {
        let dataset = &self.state.dataset;
        if dataset.columns().len() < 2 {
            return false;
        }
        dataset.rows().iter().any(|row| {
            dataset
                .columns()
                .iter()
                .all(|column| row.value(&column.id).as_number().is_some())
        })
    }

    /// Dataset handed to partners when a link is established: numeric text
    /// canonicalized, plus a trailing label column.
    pub fn shared_data_set(&self) -> DataSet {
        let mut shared = DataSet::new();
        if let Some(name) = self.state.dataset.name() {
            shared.set_name(name);
        }
        for column in self.state.dataset.columns() {
            shared.add_column(column.clone());
        }
        let rows = self
            .state
            .dataset
            .rows()
            .iter()
            .map(|row| {
                let mut row = row.clone();
                for value in row.values.values_mut() {
                    *value = value.canonicalize();
                }
                row
            })
            .collect();
        shared.insert_rows(rows, None);
        shared.add_column(Column::new(LABEL_COLUMN_ID, LABEL_COLUMN_ID));
        for index in 0..shared.rows().len() {
            shared.set_value(
                index,
                LABEL_COLUMN_ID,
                CellValue::Text(self.config.row_label(index)),
            );
        }
        shared
    }

    /// Exported document form.
    pub fn shareable_snapshot(&self) -> AuthoredTable {
        shareable_snapshot(&self.state)
    }

    pub fn shareable_snapshot_json(&self) -> Result<String, serde_json::Error> {
        shareable_snapshot_json(&self.state)
    }

    /// Returns the logged change carrying `link_id`.
    pub fn linked_change(&self, link_id: &str) -> Option<Change> {
        self.changes
            .iter()
            .filter_map(|entry| Change::parse(entry).ok())
            .find(|change| change.links.as_ref().is_some_and(|link| link.id == link_id))
    }

    fn link_descriptor(&self, new_partner: Option<&str>) -> Option<Link> {
        let mut tile_ids = self.state.metadata.linked_partner_ids().to_vec();
        if let Some(partner_id) = new_partner {
            if !tile_ids.iter().any(|id| id == partner_id) {
                tile_ids.push(partner_id.to_string());
            }
        }
        if tile_ids.is_empty() {
            return None;
        }
        Some(Link {
            id: Uuid::new_v4().to_string(),
            tile_ids,
        })
    }

    /// Appends, applies, audits and propagates one change.
    fn append(&mut self, op: ChangeOp, new_partner: Option<&str>) -> bool {
        if self.config.read_only {
            debug!(
                "event=table_change module=table status=skip tile_id={} reason=read_only",
                self.tile_id()
            );
            return false;
        }
        let links = match op {
            ChangeOp::UpdateTable { .. } => None,
            _ => self.link_descriptor(new_partner),
        };
        let json = match Change::with_links(op, links).to_json() {
            Ok(json) => json,
            Err(err) => {
                error!(
                    "event=table_change module=table status=error tile_id={} error={}",
                    self.tile_id(),
                    err
                );
                return false;
            }
        };
        // Live state applies the logged form so replay reproduces it exactly.
        let change = match Change::parse(&json) {
            Ok(change) => change,
            Err(err) => {
                error!(
                    "event=table_change module=table status=error tile_id={} error={}",
                    self.tile_id(),
                    err
                );
                return false;
            }
        };
        let entry_index = self.changes.len();
        self.changes.push(json);
        apply_change(&mut self.state, &change, entry_index, ApplyMode::Full);
        info!(
            "event=table_change module=table status=ok tile_id={} action={} target={} ids={} linked={}",
            self.tile_id(),
            change.action().as_str(),
            change.target().as_str(),
            change.op.id_count(),
            change.links.is_some()
        );

        if let Some(link) = &change.links {
            let snapshot = matches!(change.op, ChangeOp::CreateGeometryLink { .. })
                .then(|| self.shared_data_set());
            let linked = LinkedChange {
                source_tile_id: self.tile_id().to_string(),
                link_id: link.id.clone(),
                change: change.dataset_only(),
                labels: LabelMap::from_dataset(&self.state.dataset, &self.config),
                snapshot,
            };
            propagate(self.lookup.as_ref(), &link.tile_ids, &linked);
        }
        true
    }
}
