//! Change-log replay.
//!
//! # Responsibility
//! - Fold parsed changes into a `TableState` (dataset + metadata).
//! - Keep formula columns consistent with the first column after every change
//!   that can affect them.
//!
//! # Invariants
//! - Replay never panics and never aborts on a bad entry; unparsable entries
//!   are skipped with a warning.
//! - Ids absent from an entry are derived from its absolute log index, so
//!   `replay(L)` equals `replay(L[..i])` followed by `replay(L[i..], i)`.
//! - `ApplyMode::DataSetOnly` leaves link membership untouched.
//!
//! # See also
//! - `model::change` for the wire boundary.

use crate::formula::{canonicalize_formula, CompiledFormula, X_PLACEHOLDER};
use crate::model::change::{Change, ChangeOp, ColumnSpec, ColumnUpdate, RowSpec, Target};
use crate::model::dataset::{Column, ColumnId, DataSet, Row};
use crate::model::metadata::Metadata;
use crate::model::value::CellValue;
use log::{debug, warn};
use std::time::Instant;

/// Whether link bookkeeping is applied alongside dataset changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    #[default]
    Full,
    /// Materialize data only; GeometryLink changes are ignored.
    DataSetOnly,
}

/// Counters reported by one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub skipped: usize,
    pub column_changes: usize,
    pub row_changes: usize,
}

impl ReplayStats {
    fn record(&mut self, target: Target) {
        self.applied += 1;
        match target {
            Target::Table | Target::Columns => self.column_changes += 1,
            Target::Rows => self.row_changes += 1,
            Target::GeometryLink => {}
        }
    }
}

/// Materialized state of one table tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableState {
    pub dataset: DataSet,
    pub metadata: Metadata,
}

impl TableState {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            dataset: DataSet::new(),
            metadata: Metadata::new(instance_id),
        }
    }

    /// Name the first column is displayed under, if any column exists.
    pub fn x_name(&self) -> Option<&str> {
        self.dataset.first_column().map(|column| column.name.as_str())
    }

    /// Author-facing formula for `column_id`: the cached raw form, or the
    /// canonical form rendered with the current first-column name.
    pub fn display_formula(&self, column_id: &str) -> Option<String> {
        let canonical = self.metadata.formula(column_id)?;
        if let Some(raw) = self.metadata.raw_formula(column_id) {
            return Some(raw.to_string());
        }
        let x_name = self.x_name().unwrap_or(X_PLACEHOLDER);
        Some(crate::formula::display_formula(canonical, x_name))
    }
}

/// Parses and applies log entries starting at absolute index `from`.
///
/// `log` is the full log; entries before `from` are assumed to be applied
/// already.
pub fn replay(log: &[String], from: usize, state: &mut TableState, mode: ApplyMode) -> ReplayStats {
    let started_at = Instant::now();
    let mut stats = ReplayStats::default();
    for (entry_index, entry) in log.iter().enumerate().skip(from) {
        match Change::parse(entry) {
            Ok(change) => {
                apply_change(state, &change, entry_index, mode);
                stats.record(change.target());
            }
            Err(err) => {
                stats.skipped += 1;
                warn!(
                    "event=replay_skip module=replay status=skip entry_index={} reason={}",
                    entry_index, err
                );
            }
        }
    }
    debug!(
        "event=replay module=replay status=ok from={} applied={} skipped={} duration_ms={}",
        from,
        stats.applied,
        stats.skipped,
        started_at.elapsed().as_millis()
    );
    stats
}

/// Materializes a log into a fresh dataset, ignoring link bookkeeping.
pub fn apply_changes_to_dataset(log: &[String]) -> DataSet {
    let mut state = TableState::default();
    replay(log, 0, &mut state, ApplyMode::DataSetOnly);
    state.dataset
}

/// Applies one parsed change. `entry_index` seeds ids the entry omits.
pub fn apply_change(state: &mut TableState, change: &Change, entry_index: usize, mode: ApplyMode) {
    match &change.op {
        ChangeOp::CreateTable { name, columns } => {
            if let Some(name) = name {
                state.dataset.set_name(name.clone());
            }
            create_columns(state, columns, entry_index);
        }
        ChangeOp::CreateColumns { columns } => create_columns(state, columns, entry_index),
        ChangeOp::CreateRows { rows, before_id } => {
            let rows = rows
                .iter()
                .enumerate()
                .map(|(position, spec)| materialize_row(spec, entry_index, position))
                .collect();
            state.dataset.insert_rows(rows, before_id.as_ref());
            recompute_formulas(state);
        }
        ChangeOp::UpdateTable { name } => {
            if let Some(name) = name {
                state.dataset.set_name(name.clone());
            }
        }
        ChangeOp::UpdateColumns { updates } => {
            for (column_id, update) in updates {
                update_column(state, column_id, update);
            }
        }
        ChangeOp::UpdateRows { updates } => {
            for (row_id, diff) in updates {
                state.dataset.set_row_values(row_id, diff);
            }
            recompute_formulas(state);
        }
        ChangeOp::DeleteColumns { ids } => {
            for column_id in ids {
                if state.dataset.remove_column(column_id) {
                    state.metadata.clear_formula(column_id);
                }
            }
            recompute_formulas(state);
        }
        ChangeOp::DeleteRows { ids } => {
            state.dataset.remove_rows(ids);
        }
        ChangeOp::CreateGeometryLink { partner_ids } => {
            if mode == ApplyMode::Full {
                for partner_id in partner_ids {
                    state.metadata.add_linked_partner(partner_id);
                }
            }
        }
        ChangeOp::DeleteGeometryLink { partner_ids } => {
            if mode == ApplyMode::Full {
                for partner_id in partner_ids {
                    state.metadata.remove_linked_partner(partner_id);
                }
            }
        }
    }
}

/// Re-evaluates every formula column against the current first column.
pub fn recompute_formulas(state: &mut TableState) {
    if !state.metadata.has_formulas() {
        return;
    }
    let Some(x_id) = state.dataset.first_column().map(|column| column.id.clone()) else {
        return;
    };
    let formulas: Vec<(ColumnId, String)> = state
        .metadata
        .formulas()
        .iter()
        .filter(|(column_id, _)| **column_id != x_id)
        .map(|(column_id, canonical)| (column_id.clone(), canonical.clone()))
        .collect();
    for (column_id, canonical) in formulas {
        recompute_column(&mut state.dataset, &x_id, &column_id, &canonical);
    }
}

fn recompute_column(dataset: &mut DataSet, x_id: &str, column_id: &str, canonical: &str) {
    if dataset.column_index(column_id).is_none() {
        return;
    }
    let compiled = CompiledFormula::compile(canonical);
    for index in 0..dataset.rows().len() {
        let value = compiled.evaluate_cell(dataset.rows()[index].value(x_id));
        dataset.set_value(index, column_id, value);
    }
}

fn clear_error_cells(dataset: &mut DataSet, column_id: &str) {
    for index in 0..dataset.rows().len() {
        if dataset.rows()[index].value(column_id).is_error() {
            dataset.set_value(index, column_id, CellValue::Empty);
        }
    }
}

fn derived_id(entry_index: usize, position: usize) -> String {
    format!("{entry_index}-{position}")
}

fn materialize_row(spec: &RowSpec, entry_index: usize, position: usize) -> Row {
    let id = spec
        .id
        .clone()
        .unwrap_or_else(|| derived_id(entry_index, position));
    let mut row = Row::new(id);
    row.values = spec
        .values
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(column_id, value)| (column_id.clone(), value.clone()))
        .collect();
    row
}

fn create_columns(state: &mut TableState, columns: &[ColumnSpec], entry_index: usize) {
    let mut with_formula = Vec::new();
    for (position, spec) in columns.iter().enumerate() {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| derived_id(entry_index, position));
        if !state
            .dataset
            .add_column(Column::new(id.clone(), spec.name.clone()))
        {
            debug!(
                "event=column_create module=replay status=skip entry_index={} reason=duplicate_id",
                entry_index
            );
            continue;
        }
        if spec.expression.is_some() || spec.raw_expression.is_some() {
            with_formula.push((id, spec));
        }
    }
    if with_formula.is_empty() {
        return;
    }
    for (column_id, spec) in with_formula {
        let update = ColumnUpdate {
            name: None,
            expression: spec.expression.clone(),
            raw_expression: spec.raw_expression.clone(),
        };
        assign_formula(state, &column_id, &update);
    }
    recompute_formulas(state);
}

fn update_column(state: &mut TableState, column_id: &str, update: &ColumnUpdate) {
    let Some(index) = state.dataset.column_index(column_id) else {
        debug!(
            "event=column_update module=replay status=skip reason=unknown_column"
        );
        return;
    };
    if let Some(name) = &update.name {
        if let Some(column) = state.dataset.column_mut(column_id) {
            column.name = name.clone();
        }
        if index == 0 {
            state.metadata.clear_raw_formulas_referencing(X_PLACEHOLDER);
        }
    }
    if update.expression.is_some() || update.raw_expression.is_some() {
        let had_formula = state.metadata.formula(column_id).is_some();
        assign_formula(state, column_id, update);
        if state.metadata.formula(column_id).is_some() {
            recompute_formulas(state);
        } else if had_formula {
            clear_error_cells(&mut state.dataset, column_id);
        }
    }
}

/// Stores canonical and raw formulas for one existing column.
///
/// A missing canonical form is derived from the raw form. Assignment to the
/// first column is refused.
fn assign_formula(state: &mut TableState, column_id: &str, update: &ColumnUpdate) {
    if state.dataset.column_index(column_id) == Some(0) {
        warn!(
            "event=formula_assign module=replay status=skip reason=first_column"
        );
        return;
    }
    let canonical = match (&update.expression, &update.raw_expression) {
        (Some(canonical), _) => canonical.clone(),
        (None, Some(raw)) if !raw.is_empty() => {
            let x_name = state.x_name().unwrap_or(X_PLACEHOLDER).to_string();
            canonicalize_formula(raw, &x_name)
        }
        (None, Some(_)) => String::new(),
        (None, None) => return,
    };
    if canonical.is_empty() {
        state.metadata.clear_formula(column_id);
        if let Some(column) = state.dataset.column_mut(column_id) {
            column.formula = None;
        }
        return;
    }
    state.metadata.set_formula(column_id, &canonical);
    state
        .metadata
        .set_raw_formula(column_id, update.raw_expression.as_deref().unwrap_or(""));
    if let Some(column) = state.dataset.column_mut(column_id) {
        column.formula = Some(canonical);
    }
}
