//! In-process tile registry implementing `TileLookup`.

use crate::link::{LinkableContent, TileLookup};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Tile registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileRegistryError {
    InvalidTileId(String),
    DuplicateTileId(String),
}

impl Display for TileRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTileId(value) => write!(f, "tile id is invalid: {value}"),
            Self::DuplicateTileId(value) => write!(f, "tile id already registered: {value}"),
        }
    }
}

impl Error for TileRegistryError {}

/// Tile lookup scoped to one document.
#[derive(Default)]
pub struct TileRegistry {
    tiles: RwLock<BTreeMap<String, Arc<dyn LinkableContent>>>,
    linked_tables: Mutex<Vec<String>>,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one linkable tile under its own id.
    pub fn register(&self, content: Arc<dyn LinkableContent>) -> Result<(), TileRegistryError> {
        let tile_id = content.tile_id().trim().to_string();
        if !is_valid_tile_id(&tile_id) {
            return Err(TileRegistryError::InvalidTileId(tile_id));
        }
        let mut tiles = self.tiles.write().unwrap_or_else(PoisonError::into_inner);
        if tiles.contains_key(tile_id.as_str()) {
            return Err(TileRegistryError::DuplicateTileId(tile_id));
        }
        tiles.insert(tile_id, content);
        Ok(())
    }

    /// Removes one tile. Returns whether it was registered.
    pub fn unregister(&self, tile_id: &str) -> bool {
        self.tiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tile_id.trim())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.tiles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns sorted tile ids.
    pub fn tile_ids(&self) -> Vec<String> {
        self.tiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl TileLookup for TileRegistry {
    fn resolve(&self, tile_id: &str) -> Option<Arc<dyn LinkableContent>> {
        self.tiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tile_id.trim())
            .cloned()
    }

    fn note_linked_table(&self, table_id: &str) {
        let mut linked = self
            .linked_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !linked.iter().any(|id| id == table_id) {
            linked.push(table_id.to_string());
        }
    }

    fn note_unlinked_table(&self, table_id: &str) {
        self.linked_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| id != table_id);
    }

    fn linked_table_index(&self, table_id: &str) -> Option<usize> {
        self.linked_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|id| id == table_id)
    }
}

fn is_valid_tile_id(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
