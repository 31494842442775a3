use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tablelog_core::{
    AuthoredTable, CellValue, ChangeOp, LinkableContent, LinkedChange, RowValues, TableConfig,
    TableContent, TileLookup, TileRegistry,
};

struct RecordingTile {
    id: String,
    received: Mutex<Vec<LinkedChange>>,
}

impl RecordingTile {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<LinkedChange> {
        self.received.lock().unwrap().clone()
    }
}

impl LinkableContent for RecordingTile {
    fn tile_id(&self) -> &str {
        &self.id
    }

    fn apply_external_change(&self, change: &LinkedChange) {
        self.received.lock().unwrap().push(change.clone());
    }
}

fn values(pairs: &[(&str, CellValue)]) -> RowValues {
    pairs
        .iter()
        .map(|(column, value)| ((*column).to_string(), value.clone()))
        .collect()
}

fn empty_table(registry: &Arc<TileRegistry>) -> TableContent {
    TableContent::new("table-a", registry.clone(), TableConfig::default())
}

#[test]
fn columns_and_row_materialize() {
    let registry = Arc::new(TileRegistry::new());
    let mut table = empty_table(&registry);
    let x = table.add_column("x").unwrap();
    let y = table.add_column("y").unwrap();
    let rows = table
        .add_rows(
            vec![values(&[
                (x.as_str(), CellValue::Number(1.0)),
                (y.as_str(), CellValue::Number(2.0)),
            ])],
            None,
        )
        .unwrap();

    let data = table.data_set();
    assert_eq!(data.columns().len(), 2);
    assert_eq!(data.rows().len(), 1);
    assert_eq!(data.value(&rows[0], &x), &CellValue::Number(1.0));
    assert_eq!(data.value(&rows[0], &y), &CellValue::Number(2.0));
    assert_eq!(table.changes().len(), 3);
}

#[test]
fn imported_formula_column_is_computed() {
    let registry = Arc::new(TileRegistry::new());
    let import: AuthoredTable = serde_json::from_str(
        r#"{"type":"Table","name":"Growth","columns":[
            {"name":"x","values":[1,2,3]},
            {"name":"y","expression":"x+1"}
        ]}"#,
    )
    .expect("import should parse");
    let table = TableContent::from_import("table-a", &import, registry, TableConfig::default());

    let data = table.data_set();
    let y = data.column_by_name("y").expect("y column").id.clone();
    assert_eq!(
        data.column_values(&y),
        vec![
            CellValue::Number(2.0),
            CellValue::Number(3.0),
            CellValue::Number(4.0)
        ]
    );
    assert_eq!(table.changes().len(), 2);
    assert!(!table.changes()[1].contains(&y));
    assert_eq!(data.name(), Some("Growth"));
}

#[test]
fn linked_partner_receives_row_update_once() {
    let registry = Arc::new(TileRegistry::new());
    let graph = RecordingTile::new("graph-b");
    registry.register(graph.clone()).unwrap();

    let mut table = empty_table(&registry);
    let x = table.add_column("x").unwrap();
    let y = table.add_column("y").unwrap();
    let rows = table
        .add_rows(
            vec![values(&[
                (x.as_str(), CellValue::Number(1.0)),
                (y.as_str(), CellValue::Number(2.0)),
            ])],
            None,
        )
        .unwrap();

    assert!(table.add_partner_link("graph-b"));
    assert_eq!(graph.received().len(), 1);
    assert!(graph.received()[0].snapshot.is_some());
    assert_eq!(table.linked_table_index(), Some(0));

    table.update_rows(vec![(
        rows[0].clone(),
        values(&[(y.as_str(), CellValue::Number(7.0))]),
    )]);

    let received = graph.received();
    assert_eq!(received.len(), 2);
    let update = &received[1];
    assert_eq!(update.source_tile_id, "table-a");
    assert!(update.change.links.is_none());
    let ChangeOp::UpdateRows { updates } = &update.change.op else {
        panic!("expected row update");
    };
    assert_eq!(updates[0].0, rows[0]);
    assert_eq!(updates[0].1[&y], CellValue::Number(7.0));
    assert_eq!(update.labels.rows[&rows[0]], "p1");
    assert_eq!(update.labels.x_axis.as_deref(), Some("x"));

    let logged = table.linked_change(&update.link_id).expect("change with link id");
    assert_eq!(logged.op, update.change.op);
}

#[test]
fn removing_formula_column_drops_formula() {
    let registry = Arc::new(TileRegistry::new());
    let mut table = empty_table(&registry);
    let x = table.add_column("x").unwrap();
    let y = table.add_column("y").unwrap();
    table.add_rows(vec![values(&[(x.as_str(), CellValue::Number(2.0))])], None);
    table.set_formula(&y, "x ^ 2");
    assert_eq!(table.metadata().formula(&y), Some("__x__ ^ 2"));

    table.remove_columns(&[y.clone()]);
    assert_eq!(table.metadata().formula(&y), None);
    assert_eq!(table.data_set().columns().len(), 1);
}

#[test]
fn unlinkable_table_refuses_link() {
    let registry = Arc::new(TileRegistry::new());
    let graph = RecordingTile::new("graph-b");
    registry.register(graph.clone()).unwrap();

    let mut table = empty_table(&registry);
    let x = table.add_column("x").unwrap();
    table.add_rows(vec![values(&[(x.as_str(), CellValue::from("apple"))])], None);
    let before = table.changes().len();

    assert!(!table.is_valid_for_linking());
    assert!(!table.add_partner_link("graph-b"));
    assert_eq!(table.changes().len(), before);
    assert!(graph.received().is_empty());
}

#[test]
fn unresolved_partner_does_not_block_mutation() {
    let registry = Arc::new(TileRegistry::new());
    let mut table = empty_table(&registry);
    let x = table.add_column("x").unwrap();
    assert!(table.add_partner_link("graph-gone"));

    table.add_rows(vec![values(&[(x.as_str(), CellValue::Number(5.0))])], None);
    assert_eq!(table.data_set().rows().len(), 1);
    assert!(table.changes().last().unwrap().contains("graph-gone"));
}

#[test]
fn unlink_notifies_partner_and_clears_ordering() {
    let registry = Arc::new(TileRegistry::new());
    let graph = RecordingTile::new("graph-b");
    registry.register(graph.clone()).unwrap();
    let mut table = empty_table(&registry);
    table.add_column("x");

    assert!(table.add_partner_link("graph-b"));
    assert!(table.add_partner_link("graph-b"));
    assert!(table.remove_partner_link("graph-b"));
    assert!(!table.remove_partner_link("graph-b"));

    assert_eq!(graph.received().len(), 2);
    assert!(matches!(
        graph.received()[1].change.op,
        ChangeOp::DeleteGeometryLink { .. }
    ));
    assert!(!table.is_linked());
    assert_eq!(registry.linked_table_index("table-a"), None);
}

#[test]
fn teardown_notifies_every_partner() {
    let registry = Arc::new(TileRegistry::new());
    let first = RecordingTile::new("graph-1");
    let second = RecordingTile::new("graph-2");
    registry.register(first.clone()).unwrap();
    registry.register(second.clone()).unwrap();

    let mut table = empty_table(&registry);
    table.add_column("x");
    table.add_partner_link("graph-1");
    table.add_partner_link("graph-2");
    let logged = table.changes().len();

    table.will_remove_from_document();

    let removal = first.received().pop().expect("removal delivered");
    let ChangeOp::DeleteGeometryLink { partner_ids } = removal.change.op else {
        panic!("expected link removal");
    };
    assert_eq!(partner_ids, ["table-a"]);
    assert!(matches!(
        second.received().last().map(|c| &c.change.op),
        Some(ChangeOp::DeleteGeometryLink { .. })
    ));
    assert!(!table.is_linked());
    assert_eq!(table.changes().len(), logged);
}

#[test]
fn default_table_has_named_columns() {
    let registry = Arc::new(TileRegistry::new());
    let table =
        TableContent::with_default_columns("table-a", "Table 1", registry, TableConfig::default());
    let names: Vec<&str> = table
        .data_set()
        .columns()
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    assert_eq!(names, ["x", "y"]);
    assert_eq!(table.data_set().name(), Some("Table 1"));
    assert!(table.data_set().rows().is_empty());
}

#[test]
fn insert_before_anchor_and_missing_anchor() {
    let registry = Arc::new(TileRegistry::new());
    let mut table = empty_table(&registry);
    let x = table.add_column("x").unwrap();
    let first = table
        .add_rows(vec![values(&[(x.as_str(), CellValue::Number(1.0))])], None)
        .unwrap();
    let second = table
        .add_rows(
            vec![values(&[(x.as_str(), CellValue::Number(0.0))])],
            Some(tablelog_core::BeforeId::Single(first[0].clone())),
        )
        .unwrap();
    let third = table
        .add_rows(
            vec![BTreeMap::new()],
            Some(tablelog_core::BeforeId::Single("deleted-row".to_string())),
        )
        .unwrap();

    let order: Vec<&str> = table
        .data_set()
        .rows()
        .iter()
        .map(|row| row.id.as_str())
        .collect();
    assert_eq!(order, [second[0].as_str(), first[0].as_str(), third[0].as_str()]);
}
