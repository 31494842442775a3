//! Authored table import.
//!
//! Input shape: `{"type":"Table","name":..,"columns":[{"name","expression"?,"values"?}]}`.
//! `expression` is author-facing and references the first column by name.

use crate::formula::canonicalize_formula;
use crate::model::change::{Change, ChangeOp, ColumnSpec, RowSpec};
use crate::model::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Document type tag for table documents.
pub const TABLE_DOCUMENT_TYPE: &str = "Table";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthoredColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Accepted from exported documents; preferred over `expression` when set.
    #[serde(
        rename = "rawExpression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<CellValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthoredTable {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<AuthoredColumn>>,
}

impl AuthoredTable {
    /// Returns whether this looks like an authored table document.
    pub fn is_table_import(&self) -> bool {
        self.kind.as_deref() == Some(TABLE_DOCUMENT_TYPE) && self.columns.is_some()
    }
}

pub fn parse_authored_table(json: &str) -> Result<AuthoredTable, serde_json::Error> {
    serde_json::from_str(json)
}

/// Converts an authored table into at most two changes: Create/Table then
/// Create/Rows.
///
/// Formula columns carry no literal values. Ids are fresh v4 uuids.
pub fn convert_import_to_changes(table: &AuthoredTable) -> Vec<Change> {
    let Some(columns) = table.columns.as_ref() else {
        return Vec::new();
    };
    if columns.is_empty() {
        return Vec::new();
    }

    let x_name = columns[0].name.clone();
    let specs: Vec<ColumnSpec> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let raw = column
                .raw_expression
                .as_ref()
                .or(column.expression.as_ref())
                .filter(|raw| !raw.is_empty());
            let raw = if index > 0 { raw.cloned() } else { None };
            ColumnSpec {
                id: Some(Uuid::new_v4().to_string()),
                name: column.name.clone(),
                expression: raw.as_deref().map(|raw| canonicalize_formula(raw, &x_name)),
                raw_expression: raw,
            }
        })
        .collect();

    let row_count = columns
        .iter()
        .map(|column| column.values.as_ref().map_or(0, Vec::len))
        .max()
        .unwrap_or(0);
    let rows: Vec<RowSpec> = (0..row_count)
        .map(|row_index| {
            let mut values = BTreeMap::new();
            for (column, spec) in columns.iter().zip(&specs) {
                if spec.expression.is_some() {
                    continue;
                }
                let (Some(id), Some(cell)) = (
                    spec.id.as_ref(),
                    column.values.as_ref().and_then(|v| v.get(row_index)),
                ) else {
                    continue;
                };
                if !cell.is_empty() {
                    values.insert(id.clone(), cell.clone());
                }
            }
            RowSpec {
                id: Some(Uuid::new_v4().to_string()),
                values,
            }
        })
        .collect();

    let mut changes = vec![Change::new(ChangeOp::CreateTable {
        name: table.name.clone(),
        columns: specs,
    })];
    if !rows.is_empty() {
        changes.push(Change::new(ChangeOp::CreateRows {
            rows,
            before_id: None,
        }));
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::{convert_import_to_changes, parse_authored_table, AuthoredTable};
    use crate::model::change::ChangeOp;
    use crate::model::value::CellValue;

    #[test]
    fn empty_or_columnless_input_yields_no_changes() {
        assert!(convert_import_to_changes(&AuthoredTable::default()).is_empty());
        let table = parse_authored_table(r#"{"type":"Table","name":"T","columns":[]}"#)
            .expect("table should parse");
        assert!(table.is_table_import());
        assert!(convert_import_to_changes(&table).is_empty());
    }

    #[test]
    fn rows_follow_longest_column_and_skip_formula_values() {
        let table = parse_authored_table(
            r#"{"type":"Table","name":"T","columns":[
                {"name":"x","values":[1,2,3]},
                {"name":"y","expression":"x+1","values":[9,9,9]},
                {"name":"z","values":["a"]}
            ]}"#,
        )
        .expect("table should parse");
        let changes = convert_import_to_changes(&table);
        assert_eq!(changes.len(), 2);

        let ChangeOp::CreateTable { name, columns } = &changes[0].op else {
            panic!("expected create table");
        };
        assert_eq!(name.as_deref(), Some("T"));
        assert_eq!(columns[1].expression.as_deref(), Some("__x__ + 1"));
        assert_eq!(columns[1].raw_expression.as_deref(), Some("x+1"));
        let y_id = columns[1].id.clone().expect("column id");
        let z_id = columns[2].id.clone().expect("column id");

        let ChangeOp::CreateRows { rows, .. } = &changes[1].op else {
            panic!("expected create rows");
        };
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| !row.values.contains_key(&y_id)));
        assert_eq!(rows[0].values.get(&z_id), Some(&CellValue::from("a")));
        assert!(!rows[2].values.contains_key(&z_id));
    }

    #[test]
    fn first_column_expression_is_ignored() {
        let table = parse_authored_table(
            r#"{"type":"Table","columns":[{"name":"x","expression":"1"}]}"#,
        )
        .expect("table should parse");
        let changes = convert_import_to_changes(&table);
        assert_eq!(changes.len(), 1);
        let ChangeOp::CreateTable { columns, .. } = &changes[0].op else {
            panic!("expected create table");
        };
        assert_eq!(columns[0].expression, None);
    }
}
