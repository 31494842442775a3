//! Change record: the unit of the append-only table log.
//!
//! # Responsibility
//! - Define one typed variant per legal (action, target) pair.
//! - Convert between the typed form and the JSON wire form.
//!
//! # Invariants
//! - Log entries are JSON strings; parsing is the only place payload shapes
//!   are inspected.
//! - Parsing is strict about the current shape. Older shapes are rewritten by
//!   `import::legacy` before replay.
//! - Serialization never emits the error sentinel; it is written as `null`.

use crate::model::dataset::{BeforeId, ColumnId, RowId};
use crate::model::value::CellValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Wire key carrying a row id inside a row payload.
pub const ROW_ID_KEY: &str = "__id__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Target {
    Table,
    Columns,
    Rows,
    GeometryLink,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Columns => "columns",
            Self::Rows => "rows",
            Self::GeometryLink => "geometryLink",
        }
    }
}

/// `ids` wire field: one id or a list of ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ids {
    One(String),
    Many(Vec<String>),
}

impl Ids {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(id) => vec![id.clone()],
            Self::Many(ids) => ids.clone(),
        }
    }

    fn from_vec(mut ids: Vec<String>) -> Self {
        if ids.len() == 1 {
            Self::One(ids.remove(0))
        } else {
            Self::Many(ids)
        }
    }
}

/// Cross-tile relationship tag attached to a propagating change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    #[serde(rename = "tileIds")]
    pub tile_ids: Vec<String>,
}

/// JSON wire form of one log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    pub action: Action,
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Ids>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Link>,
}

/// Column payload for create changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ColumnId>,
    #[serde(default)]
    pub name: String,
    /// Canonical formula.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Author-facing formula.
    #[serde(
        rename = "rawExpression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_expression: Option<String>,
}

impl ColumnSpec {
    pub fn named(id: impl Into<ColumnId>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Row payload for create changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSpec {
    pub id: Option<RowId>,
    pub values: BTreeMap<ColumnId, CellValue>,
}

/// Per-column property update. An empty formula string clears the formula.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(
        rename = "rawExpression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_expression: Option<String>,
}

/// Typed change payload, one variant per legal (action, target) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    CreateTable {
        name: Option<String>,
        columns: Vec<ColumnSpec>,
    },
    CreateColumns {
        columns: Vec<ColumnSpec>,
    },
    CreateRows {
        rows: Vec<RowSpec>,
        before_id: Option<BeforeId>,
    },
    UpdateTable {
        name: Option<String>,
    },
    UpdateColumns {
        updates: Vec<(ColumnId, ColumnUpdate)>,
    },
    UpdateRows {
        updates: Vec<(RowId, BTreeMap<ColumnId, CellValue>)>,
    },
    DeleteColumns {
        ids: Vec<ColumnId>,
    },
    DeleteRows {
        ids: Vec<RowId>,
    },
    CreateGeometryLink {
        partner_ids: Vec<String>,
    },
    DeleteGeometryLink {
        partner_ids: Vec<String>,
    },
}

impl ChangeOp {
    pub fn action(&self) -> Action {
        match self {
            Self::CreateTable { .. }
            | Self::CreateColumns { .. }
            | Self::CreateRows { .. }
            | Self::CreateGeometryLink { .. } => Action::Create,
            Self::UpdateTable { .. } | Self::UpdateColumns { .. } | Self::UpdateRows { .. } => {
                Action::Update
            }
            Self::DeleteColumns { .. }
            | Self::DeleteRows { .. }
            | Self::DeleteGeometryLink { .. } => Action::Delete,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Self::CreateTable { .. } | Self::UpdateTable { .. } => Target::Table,
            Self::CreateColumns { .. } | Self::UpdateColumns { .. } | Self::DeleteColumns { .. } => {
                Target::Columns
            }
            Self::CreateRows { .. } | Self::UpdateRows { .. } | Self::DeleteRows { .. } => {
                Target::Rows
            }
            Self::CreateGeometryLink { .. } | Self::DeleteGeometryLink { .. } => {
                Target::GeometryLink
            }
        }
    }

    /// Number of entities addressed by this change, for audit logging.
    pub fn id_count(&self) -> usize {
        match self {
            Self::CreateTable { columns, .. } | Self::CreateColumns { columns } => columns.len(),
            Self::CreateRows { rows, .. } => rows.len(),
            Self::UpdateTable { .. } => 0,
            Self::UpdateColumns { updates } => updates.len(),
            Self::UpdateRows { updates } => updates.len(),
            Self::DeleteColumns { ids } | Self::DeleteRows { ids } => ids.len(),
            Self::CreateGeometryLink { partner_ids } | Self::DeleteGeometryLink { partner_ids } => {
                partner_ids.len()
            }
        }
    }
}

/// One immutable log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub op: ChangeOp,
    pub links: Option<Link>,
}

/// Failure to read one log entry.
#[derive(Debug)]
pub enum ChangeParseError {
    Json(serde_json::Error),
    UnsupportedPair {
        action: Action,
        target: Target,
    },
    InvalidProps {
        action: Action,
        target: Target,
        reason: String,
    },
}

impl Display for ChangeParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid change json: {err}"),
            Self::UnsupportedPair { action, target } => write!(
                f,
                "unsupported change pair: {}/{}",
                action.as_str(),
                target.as_str()
            ),
            Self::InvalidProps {
                action,
                target,
                reason,
            } => write!(
                f,
                "invalid props for {}/{}: {reason}",
                action.as_str(),
                target.as_str()
            ),
        }
    }
}

impl Error for ChangeParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChangeParseError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Deserialize)]
struct CreateTableProps {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnSpec>,
}

#[derive(Deserialize)]
struct CreateColumnsProps {
    columns: Vec<ColumnSpec>,
}

#[derive(Deserialize)]
struct CreateRowsProps {
    rows: Vec<Map<String, Value>>,
    #[serde(rename = "beforeId", default)]
    before_id: Option<BeforeId>,
}

#[derive(Deserialize)]
struct UpdateTableProps {
    #[serde(default)]
    name: Option<String>,
}

impl Change {
    pub fn new(op: ChangeOp) -> Self {
        Self { op, links: None }
    }

    pub fn with_links(op: ChangeOp, links: Option<Link>) -> Self {
        Self { op, links }
    }

    pub fn action(&self) -> Action {
        self.op.action()
    }

    pub fn target(&self) -> Target {
        self.op.target()
    }

    /// Returns the change without link bookkeeping, as sent to partners.
    pub fn dataset_only(&self) -> Change {
        Self::new(self.op.clone())
    }

    /// Parses one JSON log entry.
    ///
    /// # Errors
    /// - Returns `ChangeParseError::Json` for invalid JSON or unknown
    ///   action/target names.
    /// - Returns `UnsupportedPair` / `InvalidProps` for shapes outside the
    ///   current format.
    pub fn parse(json: &str) -> Result<Change, ChangeParseError> {
        let wire: WireChange = serde_json::from_str(json)?;
        Self::from_wire(wire)
    }

    /// Converts the wire form into the typed form.
    pub fn from_wire(wire: WireChange) -> Result<Change, ChangeParseError> {
        let WireChange {
            action,
            target,
            ids,
            props,
            links,
        } = wire;
        let ids = ids.map(|ids| ids.to_vec()).unwrap_or_default();
        let invalid = |reason: String| ChangeParseError::InvalidProps {
            action,
            target,
            reason,
        };
        let props_as = |props: Option<Value>| -> Value { props.unwrap_or(Value::Null) };
        let object_or_empty =
            |props: Option<Value>| -> Value { props.unwrap_or_else(|| Value::Object(Map::new())) };

        let op = match (action, target) {
            (Action::Create, Target::Table) => {
                let parsed: CreateTableProps =
                    serde_json::from_value(object_or_empty(props)).map_err(|e| invalid(e.to_string()))?;
                ChangeOp::CreateTable {
                    name: parsed.name,
                    columns: assign_column_ids(parsed.columns, &ids),
                }
            }
            (Action::Create, Target::Columns) => {
                let parsed: CreateColumnsProps =
                    serde_json::from_value(props_as(props)).map_err(|e| invalid(e.to_string()))?;
                ChangeOp::CreateColumns {
                    columns: assign_column_ids(parsed.columns, &ids),
                }
            }
            (Action::Create, Target::Rows) => {
                let parsed: CreateRowsProps =
                    serde_json::from_value(props_as(props)).map_err(|e| invalid(e.to_string()))?;
                let mut rows = Vec::with_capacity(parsed.rows.len());
                for (index, row) in parsed.rows.into_iter().enumerate() {
                    let (row_id, values) = parse_row_values(row).map_err(&invalid)?;
                    rows.push(RowSpec {
                        id: row_id.or_else(|| ids.get(index).cloned()),
                        values,
                    });
                }
                ChangeOp::CreateRows {
                    rows,
                    before_id: parsed.before_id,
                }
            }
            (Action::Update, Target::Table) => {
                let parsed: UpdateTableProps =
                    serde_json::from_value(object_or_empty(props)).map_err(|e| invalid(e.to_string()))?;
                ChangeOp::UpdateTable { name: parsed.name }
            }
            (Action::Update, Target::Columns) => {
                let updates: Vec<ColumnUpdate> = one_or_many(props_as(props))
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<_, _>>()
                    .map_err(|e| invalid(e.to_string()))?;
                ChangeOp::UpdateColumns {
                    updates: ids.into_iter().zip(updates).collect(),
                }
            }
            (Action::Update, Target::Rows) => {
                let mut updates = Vec::new();
                for (index, value) in one_or_many(props_as(props)).into_iter().enumerate() {
                    let Value::Object(row) = value else {
                        return Err(invalid(format!("row update {index} is not an object")));
                    };
                    let (row_id, values) = parse_row_values(row).map_err(&invalid)?;
                    let Some(row_id) = row_id.or_else(|| ids.get(index).cloned()) else {
                        return Err(invalid(format!("row update {index} has no id")));
                    };
                    updates.push((row_id, values));
                }
                ChangeOp::UpdateRows { updates }
            }
            (Action::Delete, Target::Columns) => ChangeOp::DeleteColumns { ids },
            (Action::Delete, Target::Rows) => ChangeOp::DeleteRows { ids },
            (Action::Create, Target::GeometryLink) => {
                ChangeOp::CreateGeometryLink { partner_ids: ids }
            }
            (Action::Delete, Target::GeometryLink) => {
                ChangeOp::DeleteGeometryLink { partner_ids: ids }
            }
            (action, target) => return Err(ChangeParseError::UnsupportedPair { action, target }),
        };

        Ok(Change { op, links })
    }

    /// Converts the typed form into the wire form.
    pub fn to_wire(&self) -> WireChange {
        let (ids, props) = match &self.op {
            ChangeOp::CreateTable { name, columns } => {
                let (ids, columns) = hoist_column_ids(columns);
                let mut props = Map::new();
                if let Some(name) = name {
                    props.insert("name".to_string(), Value::String(name.clone()));
                }
                props.insert("columns".to_string(), to_value(&columns));
                (ids.map(Ids::Many), Some(Value::Object(props)))
            }
            ChangeOp::CreateColumns { columns } => {
                let (ids, columns) = hoist_column_ids(columns);
                let mut props = Map::new();
                props.insert("columns".to_string(), to_value(&columns));
                (ids.map(Ids::Many), Some(Value::Object(props)))
            }
            ChangeOp::CreateRows { rows, before_id } => {
                let all_ids: Option<Vec<RowId>> = rows.iter().map(|row| row.id.clone()).collect();
                let payload: Vec<Value> = rows
                    .iter()
                    .map(|row| {
                        let mut map = row_values_to_map(&row.values);
                        if let (None, Some(id)) = (&all_ids, &row.id) {
                            map.insert(ROW_ID_KEY.to_string(), Value::String(id.clone()));
                        }
                        Value::Object(map)
                    })
                    .collect();
                let mut props = Map::new();
                props.insert("rows".to_string(), Value::Array(payload));
                if let Some(before_id) = before_id {
                    props.insert("beforeId".to_string(), to_value(before_id));
                }
                (all_ids.map(Ids::Many), Some(Value::Object(props)))
            }
            ChangeOp::UpdateTable { name } => {
                let mut props = Map::new();
                if let Some(name) = name {
                    props.insert("name".to_string(), Value::String(name.clone()));
                }
                (None, Some(Value::Object(props)))
            }
            ChangeOp::UpdateColumns { updates } => {
                let ids: Vec<ColumnId> = updates.iter().map(|(id, _)| id.clone()).collect();
                let props = if updates.len() == 1 {
                    to_value(&updates[0].1)
                } else {
                    Value::Array(updates.iter().map(|(_, update)| to_value(update)).collect())
                };
                (Some(Ids::from_vec(ids)), Some(props))
            }
            ChangeOp::UpdateRows { updates } => {
                let ids: Vec<RowId> = updates.iter().map(|(id, _)| id.clone()).collect();
                let props = updates
                    .iter()
                    .map(|(_, values)| Value::Object(row_values_to_map(values)))
                    .collect();
                (Some(Ids::Many(ids)), Some(Value::Array(props)))
            }
            ChangeOp::DeleteColumns { ids } | ChangeOp::DeleteRows { ids } => {
                (Some(Ids::Many(ids.clone())), None)
            }
            ChangeOp::CreateGeometryLink { partner_ids }
            | ChangeOp::DeleteGeometryLink { partner_ids } => {
                (Some(Ids::from_vec(partner_ids.clone())), None)
            }
        };

        WireChange {
            action: self.action(),
            target: self.target(),
            ids,
            props,
            links: self.links.clone(),
        }
    }

    /// Serializes this change as one JSON log entry.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_wire())
    }
}

fn assign_column_ids(columns: Vec<ColumnSpec>, ids: &[String]) -> Vec<ColumnSpec> {
    columns
        .into_iter()
        .enumerate()
        .map(|(index, mut column)| {
            if column.id.is_none() {
                column.id = ids.get(index).cloned();
            }
            column
        })
        .collect()
}

fn hoist_column_ids(columns: &[ColumnSpec]) -> (Option<Vec<ColumnId>>, Vec<ColumnSpec>) {
    let ids: Option<Vec<ColumnId>> = columns.iter().map(|column| column.id.clone()).collect();
    match ids {
        Some(ids) => {
            let stripped = columns
                .iter()
                .map(|column| ColumnSpec {
                    id: None,
                    ..column.clone()
                })
                .collect();
            (Some(ids), stripped)
        }
        None => (None, columns.to_vec()),
    }
}

fn one_or_many(value: Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn parse_row_values(
    row: Map<String, Value>,
) -> Result<(Option<RowId>, BTreeMap<ColumnId, CellValue>), String> {
    let mut row_id = None;
    let mut values = BTreeMap::new();
    for (key, value) in row {
        if key == ROW_ID_KEY {
            match value {
                Value::String(id) => row_id = Some(id),
                other => return Err(format!("row id must be a string, got {other}")),
            }
            continue;
        }
        let cell: CellValue = serde_json::from_value(value)
            .map_err(|err| format!("invalid cell for column `{key}`: {err}"))?;
        values.insert(key, cell);
    }
    Ok((row_id, values))
}

fn row_values_to_map(values: &BTreeMap<ColumnId, CellValue>) -> Map<String, Value> {
    values
        .iter()
        .map(|(column_id, value)| (column_id.clone(), to_value(value)))
        .collect()
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::{Action, Change, ChangeOp, ChangeParseError, ColumnSpec, Link, RowSpec, Target};
    use crate::model::dataset::BeforeId;
    use crate::model::value::CellValue;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn parses_create_columns_with_hoisted_ids() {
        let change = Change::parse(
            &json!({
                "action": "create",
                "target": "columns",
                "ids": ["xCol", "yCol"],
                "props": { "columns": [{ "name": "x" }, { "name": "y" }] }
            })
            .to_string(),
        )
        .expect("change should parse");
        assert_eq!(
            change.op,
            ChangeOp::CreateColumns {
                columns: vec![ColumnSpec::named("xCol", "x"), ColumnSpec::named("yCol", "y")],
            }
        );
        assert!(change.links.is_none());
    }

    #[test]
    fn parses_rows_with_inline_ids_and_anchor() {
        let change = Change::parse(
            &json!({
                "action": "create",
                "target": "rows",
                "props": {
                    "rows": [{ "__id__": "row1", "xCol": 1, "yCol": "a" }],
                    "beforeId": "row0"
                },
                "links": { "id": "link-1", "tileIds": ["geo-1"] }
            })
            .to_string(),
        )
        .expect("change should parse");
        let ChangeOp::CreateRows { rows, before_id } = change.op else {
            panic!("expected create rows");
        };
        assert_eq!(rows[0].id.as_deref(), Some("row1"));
        assert_eq!(rows[0].values["xCol"], CellValue::Number(1.0));
        assert_eq!(rows[0].values["yCol"], CellValue::from("a"));
        assert_eq!(before_id, Some(BeforeId::Single("row0".to_string())));
        assert_eq!(
            change.links,
            Some(Link {
                id: "link-1".to_string(),
                tile_ids: vec!["geo-1".to_string()],
            })
        );
    }

    #[test]
    fn update_rows_accepts_object_or_array_props() {
        let single = Change::parse(
            r#"{"action":"update","target":"rows","ids":"r1","props":{"c1":5}}"#,
        )
        .expect("single update should parse");
        let ChangeOp::UpdateRows { updates } = single.op else {
            panic!("expected update rows");
        };
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "r1");

        let legacy = Change::parse(
            r#"{"action":"update","target":"rows","props":[{"__id__":"r3","c1":null}]}"#,
        )
        .expect("id-in-props update should parse");
        let ChangeOp::UpdateRows { updates } = legacy.op else {
            panic!("expected update rows");
        };
        assert_eq!(updates[0].0, "r3");
        assert_eq!(updates[0].1["c1"], CellValue::Empty);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(matches!(
            Change::parse("not json"),
            Err(ChangeParseError::Json(_))
        ));
        assert!(matches!(
            Change::parse(r#"{"action":"rename","target":"rows"}"#),
            Err(ChangeParseError::Json(_))
        ));
        assert!(matches!(
            Change::parse(r#"{"action":"delete","target":"table"}"#),
            Err(ChangeParseError::UnsupportedPair {
                action: Action::Delete,
                target: Target::Table
            })
        ));
        assert!(matches!(
            Change::parse(r#"{"action":"create","target":"columns","props":[{"name":"x"}]}"#),
            Err(ChangeParseError::InvalidProps { .. })
        ));
    }

    #[test]
    fn wire_form_survives_reparse() {
        let mut values = BTreeMap::new();
        values.insert("c1".to_string(), CellValue::Number(2.0));
        let changes = vec![
            Change::new(ChangeOp::CreateTable {
                name: Some("T".to_string()),
                columns: vec![ColumnSpec::named("c1", "x")],
            }),
            Change::new(ChangeOp::CreateRows {
                rows: vec![RowSpec {
                    id: Some("r1".to_string()),
                    values: values.clone(),
                }],
                before_id: None,
            }),
            Change::new(ChangeOp::UpdateRows {
                updates: vec![("r1".to_string(), values)],
            }),
            Change::new(ChangeOp::DeleteGeometryLink {
                partner_ids: vec!["g1".to_string()],
            }),
        ];
        for change in changes {
            let json = change.to_json().expect("change should serialize");
            let reparsed = Change::parse(&json).expect("serialized change should parse");
            assert_eq!(reparsed, change);
        }
    }

    #[test]
    fn single_column_update_uses_scalar_wire_shape() {
        let change = Change::new(ChangeOp::UpdateColumns {
            updates: vec![(
                "zCol".to_string(),
                super::ColumnUpdate {
                    name: Some("newZ".to_string()),
                    ..Default::default()
                },
            )],
        });
        let wire = serde_json::to_value(change.to_wire()).expect("wire should serialize");
        assert_eq!(
            wire,
            json!({
                "action": "update",
                "target": "columns",
                "ids": "zCol",
                "props": { "name": "newZ" }
            })
        );
    }
}
