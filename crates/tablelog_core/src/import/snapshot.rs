//! Whole-log helpers used when documents are copied or converted.

use crate::model::change::{Ids, Target, WireChange};
use crate::model::dataset::DataSet;
use crate::replay::{replay, ApplyMode, TableState};
use std::collections::BTreeMap;

/// Materialized result of a full log conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSnapshot {
    pub dataset: DataSet,
    /// Partner tiles still linked after the last entry.
    pub linked_partner_ids: Vec<String>,
}

/// Replays a log into a dataset plus the surviving partner links.
pub fn convert_changes_to_snapshot(log: &[String]) -> LogSnapshot {
    let mut state = TableState::default();
    replay(log, 0, &mut state, ApplyMode::Full);
    LogSnapshot {
        linked_partner_ids: state.metadata.linked_partner_ids().to_vec(),
        dataset: state.dataset,
    }
}

/// Rewrites tile ids in GeometryLink entries and link descriptors.
///
/// Ids absent from `id_map` are kept. Entries that are unparsable or that
/// reference no mapped tile are returned unchanged.
pub fn remap_tile_ids(log: &[String], id_map: &BTreeMap<String, String>) -> Vec<String> {
    let map_id = |id: &String| id_map.get(id).cloned().unwrap_or_else(|| id.clone());
    log.iter()
        .map(|entry| {
            let Ok(mut wire) = serde_json::from_str::<WireChange>(entry) else {
                return entry.clone();
            };
            let mut changed = false;
            if wire.target == Target::GeometryLink {
                if let Some(ids) = wire.ids.take() {
                    let remapped = match &ids {
                        Ids::One(id) => Ids::One(map_id(id)),
                        Ids::Many(ids) => Ids::Many(ids.iter().map(map_id).collect()),
                    };
                    changed |= remapped != ids;
                    wire.ids = Some(remapped);
                }
            }
            if let Some(links) = wire.links.as_mut() {
                let remapped: Vec<String> = links.tile_ids.iter().map(map_id).collect();
                changed |= remapped != links.tile_ids;
                links.tile_ids = remapped;
            }
            if !changed {
                return entry.clone();
            }
            serde_json::to_string(&wire).unwrap_or_else(|_| entry.clone())
        })
        .collect()
}
