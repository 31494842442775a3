//! Cross-tile link protocol.
//!
//! # Responsibility
//! - Define the capability a partner tile exposes to receive mirrored changes.
//! - Provide the injected tile lookup service and its in-process registry.
//! - Deliver one appended change to every linked partner.
//!
//! # Invariants
//! - Delivery is best-effort; an unresolved partner is skipped and never fails
//!   the source mutation.
//! - The protocol depends only on `LinkableContent`, never on a concrete
//!   partner type.

pub mod registry;

pub use registry::{TileRegistry, TileRegistryError};

use crate::config::TableConfig;
use crate::model::change::Change;
use crate::model::dataset::{DataSet, RowId};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label id for the x-axis entry of a partner label list.
pub const X_AXIS_LABEL_ID: &str = "xAxis";
/// Label id for the y-axis entry of a partner label list.
pub const Y_AXIS_LABEL_ID: &str = "yAxis";

/// Display labels sent alongside a mirrored change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    pub x_axis: Option<String>,
    pub y_axis: Option<String>,
    /// Row id -> stable display label.
    pub rows: BTreeMap<RowId, String>,
}

impl LabelMap {
    pub fn from_dataset(dataset: &DataSet, config: &TableConfig) -> Self {
        let (x_axis, y_axis) = axis_labels(dataset);
        let rows = dataset
            .rows()
            .iter()
            .enumerate()
            .map(|(index, row)| (row.id.clone(), config.row_label(index)))
            .collect();
        Self {
            x_axis,
            y_axis,
            rows,
        }
    }

    /// Flattened `(id, label)` list, axis entries first.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::with_capacity(self.rows.len() + 2);
        if let Some(label) = &self.x_axis {
            entries.push((X_AXIS_LABEL_ID.to_string(), label.clone()));
        }
        if let Some(label) = &self.y_axis {
            entries.push((Y_AXIS_LABEL_ID.to_string(), label.clone()));
        }
        entries.extend(
            self.rows
                .iter()
                .map(|(id, label)| (id.clone(), label.clone())),
        );
        entries
    }
}

/// Axis labels: x is the first column name, y joins the remaining names.
pub fn axis_labels(dataset: &DataSet) -> (Option<String>, Option<String>) {
    let mut names = dataset.columns().iter().map(|column| column.name.as_str());
    let x_axis = names.next().map(str::to_string);
    let rest: Vec<&str> = names.collect();
    let y_axis = (!rest.is_empty()).then(|| rest.join(", "));
    (x_axis, y_axis)
}

/// Payload delivered to a partner tile.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedChange {
    pub source_tile_id: String,
    /// Shared by every delivery of one logical action; receivers may dedupe.
    pub link_id: String,
    /// Dataset-only form of the appended change.
    pub change: Change,
    pub labels: LabelMap,
    /// Shared data set, attached when a link is being established.
    pub snapshot: Option<DataSet>,
}

/// Capability exposed by tiles that mirror table changes.
pub trait LinkableContent: Send + Sync {
    fn tile_id(&self) -> &str;

    /// Receives one synchronized change.
    fn apply_external_change(&self, change: &LinkedChange);
}

/// Injected tile-id resolution and linked-table bookkeeping.
pub trait TileLookup: Send + Sync {
    fn resolve(&self, tile_id: &str) -> Option<Arc<dyn LinkableContent>>;

    /// Records that `table_id` gained its first link.
    fn note_linked_table(&self, table_id: &str);

    /// Records that `table_id` has no links left.
    fn note_unlinked_table(&self, table_id: &str);

    /// Position of `table_id` in link order, used by partners for styling.
    fn linked_table_index(&self, table_id: &str) -> Option<usize>;
}

/// Delivers `linked` to every partner in `partner_ids`.
///
/// Returns the number of partners reached.
pub fn propagate(lookup: &dyn TileLookup, partner_ids: &[String], linked: &LinkedChange) -> usize {
    let mut delivered = 0;
    for partner_id in partner_ids {
        match lookup.resolve(partner_id) {
            Some(partner) => {
                partner.apply_external_change(linked);
                delivered += 1;
            }
            None => debug!(
                "event=link_propagate module=link status=skip tile_id={} reason=unresolved_partner",
                linked.source_tile_id
            ),
        }
    }
    delivered
}
