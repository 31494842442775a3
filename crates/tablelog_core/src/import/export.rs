//! Shareable document export.
//!
//! Output shape: `{"type":"Table","name","columns":[{"name","expression",
//! "rawExpression","values"?}]}`. `expression` is canonical, `rawExpression`
//! is the author-facing form. Formula columns omit `values`.

use crate::import::authored::{AuthoredColumn, AuthoredTable, TABLE_DOCUMENT_TYPE};
use crate::model::value::CellValue;
use crate::replay::TableState;

/// Exports the current table as an authored document.
///
/// Every value column carries one entry per row; empty cells are written as
/// `null`.
pub fn shareable_snapshot(state: &TableState) -> AuthoredTable {
    let dataset = &state.dataset;
    let columns = dataset
        .columns()
        .iter()
        .map(|column| {
            let canonical = state.metadata.formula(&column.id);
            let values = if canonical.is_some() {
                None
            } else {
                Some(
                    dataset
                        .column_values(&column.id)
                        .into_iter()
                        .map(|value| match value {
                            CellValue::Error => CellValue::Empty,
                            other => other,
                        })
                        .collect(),
                )
            };
            AuthoredColumn {
                name: column.name.clone(),
                expression: canonical.map(str::to_string),
                raw_expression: state.display_formula(&column.id),
                values,
            }
        })
        .collect();

    AuthoredTable {
        kind: Some(TABLE_DOCUMENT_TYPE.to_string()),
        name: Some(dataset.name().unwrap_or_default().to_string()),
        columns: Some(columns),
    }
}

/// JSON form of `shareable_snapshot`.
pub fn shareable_snapshot_json(state: &TableState) -> Result<String, serde_json::Error> {
    serde_json::to_string(&shareable_snapshot(state))
}
