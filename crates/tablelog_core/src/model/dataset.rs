//! Materialized table view.
//!
//! # Responsibility
//! - Hold ordered columns and ordered rows reconstructed from a change log.
//! - Provide id-based positional edits used by the replayer.
//!
//! # Invariants
//! - Column ids and row ids are unique within one `DataSet`.
//! - Column order is creation order minus deletions.
//! - Rows only carry values for columns that currently exist.
//! - A `DataSet` is never persisted; it is rebuilt by replay.

use crate::model::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ColumnId = String;
pub type RowId = String;

static EMPTY_CELL: CellValue = CellValue::Empty;

/// One table column (attribute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    /// Canonical formula, when the column is computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl Column {
    pub fn new(id: impl Into<ColumnId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            formula: None,
        }
    }
}

/// One table row (case).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    #[serde(default)]
    pub values: BTreeMap<ColumnId, CellValue>,
}

impl Row {
    pub fn new(id: impl Into<RowId>) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    /// Returns the cell for `column_id`, or `Empty` when unset.
    pub fn value(&self, column_id: &str) -> &CellValue {
        self.values.get(column_id).unwrap_or(&EMPTY_CELL)
    }
}

/// Insert anchor for created rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BeforeId {
    /// Every inserted row goes before this row.
    Single(RowId),
    /// One anchor per inserted row, by position.
    PerRow(Vec<RowId>),
}

impl BeforeId {
    fn anchor_for(&self, index: usize) -> Option<&str> {
        match self {
            Self::Single(id) => Some(id.as_str()),
            Self::PerRow(ids) => ids.get(index).map(String::as_str),
        }
    }
}

/// Ordered, queryable table contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    rows: Vec<Row>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == id)
    }

    pub fn column_index(&self, id: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn first_column(&self) -> Option<&Column> {
        self.columns.first()
    }

    pub fn row(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn row_index(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }

    /// Returns the cell at (`row_id`, `column_id`), or `Empty` when either is
    /// missing.
    pub fn value(&self, row_id: &str, column_id: &str) -> &CellValue {
        self.row(row_id)
            .map(|row| row.value(column_id))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Returns the values of one column in row order.
    pub fn column_values(&self, column_id: &str) -> Vec<CellValue> {
        self.rows
            .iter()
            .map(|row| row.value(column_id).clone())
            .collect()
    }

    /// Appends a column. Returns `false` when the id is already present.
    pub fn add_column(&mut self, column: Column) -> bool {
        if self.column_index(&column.id).is_some() {
            return false;
        }
        self.columns.push(column);
        true
    }

    pub(crate) fn column_mut(&mut self, id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|column| column.id == id)
    }

    /// Removes a column and its cells. Returns `false` for unknown ids.
    pub fn remove_column(&mut self, id: &str) -> bool {
        let Some(index) = self.column_index(id) else {
            return false;
        };
        self.columns.remove(index);
        for row in &mut self.rows {
            row.values.remove(id);
        }
        true
    }

    /// Inserts rows honoring the optional anchor.
    ///
    /// Rows whose id already exists are skipped. An anchor that does not name a
    /// current row appends at the end. Returns the number of inserted rows.
    pub fn insert_rows(&mut self, rows: Vec<Row>, before: Option<&BeforeId>) -> usize {
        let mut inserted = 0;
        for (index, mut row) in rows.into_iter().enumerate() {
            if self.row_index(&row.id).is_some() {
                continue;
            }
            row.values
                .retain(|column_id, _| self.columns.iter().any(|c| &c.id == column_id));
            let position = before
                .and_then(|anchor| anchor.anchor_for(index))
                .and_then(|anchor| self.row_index(anchor))
                .unwrap_or(self.rows.len());
            self.rows.insert(position, row);
            inserted += 1;
        }
        inserted
    }

    /// Overwrites only the supplied cells of one row.
    ///
    /// Unknown rows and unknown columns are ignored. Returns whether the row
    /// exists.
    pub fn set_row_values(&mut self, row_id: &str, diff: &BTreeMap<ColumnId, CellValue>) -> bool {
        let Some(index) = self.row_index(row_id) else {
            return false;
        };
        for (column_id, value) in diff {
            if self.column_index(column_id).is_none() {
                continue;
            }
            let row = &mut self.rows[index];
            if value.is_empty() {
                row.values.remove(column_id);
            } else {
                row.values.insert(column_id.clone(), value.clone());
            }
        }
        true
    }

    pub(crate) fn set_value(&mut self, row_index: usize, column_id: &str, value: CellValue) {
        if let Some(row) = self.rows.get_mut(row_index) {
            if value == CellValue::Empty {
                row.values.remove(column_id);
            } else {
                row.values.insert(column_id.to_string(), value);
            }
        }
    }

    /// Removes rows by id. Returns the number of removed rows.
    pub fn remove_rows(&mut self, ids: &[RowId]) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !ids.contains(&row.id));
        before - self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{BeforeId, CellValue, Column, DataSet, Row};
    use std::collections::BTreeMap;

    fn row(id: &str, pairs: &[(&str, f64)]) -> Row {
        let mut row = Row::new(id);
        for (column, value) in pairs {
            row.values
                .insert((*column).to_string(), CellValue::Number(*value));
        }
        row
    }

    fn two_column_set() -> DataSet {
        let mut data = DataSet::new();
        data.add_column(Column::new("c1", "x"));
        data.add_column(Column::new("c2", "y"));
        data
    }

    fn row_ids(data: &DataSet) -> Vec<&str> {
        data.rows().iter().map(|row| row.id.as_str()).collect()
    }

    #[test]
    fn duplicate_column_ids_are_rejected() {
        let mut data = two_column_set();
        assert!(!data.add_column(Column::new("c1", "again")));
        assert_eq!(data.columns().len(), 2);
    }

    #[test]
    fn insert_rows_honors_single_anchor_and_keeps_order() {
        let mut data = two_column_set();
        data.insert_rows(vec![row("r1", &[]), row("r2", &[])], None);
        data.insert_rows(
            vec![row("a", &[]), row("b", &[])],
            Some(&BeforeId::Single("r2".to_string())),
        );
        assert_eq!(row_ids(&data), vec!["r1", "a", "b", "r2"]);
    }

    #[test]
    fn insert_rows_honors_per_row_anchors() {
        let mut data = two_column_set();
        data.insert_rows(vec![row("r1", &[]), row("r2", &[])], None);
        data.insert_rows(
            vec![row("a", &[]), row("b", &[])],
            Some(&BeforeId::PerRow(vec!["r2".to_string(), "r1".to_string()])),
        );
        assert_eq!(row_ids(&data), vec!["b", "r1", "a", "r2"]);
    }

    #[test]
    fn missing_anchor_appends_at_end() {
        let mut data = two_column_set();
        data.insert_rows(vec![row("r1", &[])], None);
        data.remove_rows(&["r1".to_string()]);
        data.insert_rows(vec![row("r2", &[])], None);
        data.insert_rows(
            vec![row("r3", &[])],
            Some(&BeforeId::Single("r1".to_string())),
        );
        assert_eq!(row_ids(&data), vec!["r2", "r3"]);
    }

    #[test]
    fn insert_drops_unknown_columns_and_duplicate_rows() {
        let mut data = two_column_set();
        let inserted = data.insert_rows(vec![row("r1", &[("c1", 1.0), ("zz", 9.0)])], None);
        assert_eq!(inserted, 1);
        assert_eq!(data.insert_rows(vec![row("r1", &[])], None), 0);
        assert_eq!(data.value("r1", "c1"), &CellValue::Number(1.0));
        assert!(data.row("r1").expect("row").values.get("zz").is_none());
    }

    #[test]
    fn set_row_values_is_a_partial_diff() {
        let mut data = two_column_set();
        data.insert_rows(vec![row("r1", &[("c1", 1.0), ("c2", 2.0)])], None);
        let mut diff = BTreeMap::new();
        diff.insert("c2".to_string(), CellValue::Number(5.0));
        assert!(data.set_row_values("r1", &diff));
        assert_eq!(data.value("r1", "c1"), &CellValue::Number(1.0));
        assert_eq!(data.value("r1", "c2"), &CellValue::Number(5.0));
        assert!(!data.set_row_values("missing", &diff));
    }

    #[test]
    fn remove_column_drops_cells() {
        let mut data = two_column_set();
        data.insert_rows(vec![row("r1", &[("c1", 1.0), ("c2", 2.0)])], None);
        assert!(data.remove_column("c2"));
        assert!(!data.remove_column("c2"));
        assert_eq!(data.columns().len(), 1);
        assert_eq!(data.value("r1", "c2"), &CellValue::Empty);
    }
}
