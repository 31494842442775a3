//! Per-tile table metadata that is not part of the dataset.
//!
//! # Responsibility
//! - Track linked partner tiles in link order.
//! - Keep canonical and author-facing formulas per column.
//!
//! # Invariants
//! - `linked_partner_ids` holds no duplicates.
//! - A column has a raw formula only while it has a canonical formula, except
//!   transiently while the first column is being renamed.

use crate::formula::formula_references;
use crate::model::dataset::ColumnId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    instance_id: String,
    linked_partner_ids: Vec<String>,
    formulas: BTreeMap<ColumnId, String>,
    raw_formulas: BTreeMap<ColumnId, String>,
}

impl Metadata {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn linked_partner_ids(&self) -> &[String] {
        &self.linked_partner_ids
    }

    pub fn is_linked(&self) -> bool {
        !self.linked_partner_ids.is_empty()
    }

    pub fn is_linked_to(&self, partner_id: &str) -> bool {
        self.linked_partner_ids.iter().any(|id| id == partner_id)
    }

    pub fn link_count(&self) -> usize {
        self.linked_partner_ids.len()
    }

    /// Adds a partner. Returns `false` when it was already linked.
    pub fn add_linked_partner(&mut self, partner_id: &str) -> bool {
        if self.is_linked_to(partner_id) {
            return false;
        }
        self.linked_partner_ids.push(partner_id.to_string());
        true
    }

    /// Removes a partner. Returns `false` when it was not linked.
    pub fn remove_linked_partner(&mut self, partner_id: &str) -> bool {
        let before = self.linked_partner_ids.len();
        self.linked_partner_ids.retain(|id| id != partner_id);
        before != self.linked_partner_ids.len()
    }

    pub fn clear_linked_partners(&mut self) {
        self.linked_partner_ids.clear();
    }

    pub fn formula(&self, column_id: &str) -> Option<&str> {
        self.formulas.get(column_id).map(String::as_str)
    }

    pub fn raw_formula(&self, column_id: &str) -> Option<&str> {
        self.raw_formulas.get(column_id).map(String::as_str)
    }

    pub fn formulas(&self) -> &BTreeMap<ColumnId, String> {
        &self.formulas
    }

    pub fn has_formulas(&self) -> bool {
        !self.formulas.is_empty()
    }

    /// Sets the canonical formula; an empty string clears it.
    pub fn set_formula(&mut self, column_id: &str, canonical: &str) {
        if canonical.is_empty() {
            self.formulas.remove(column_id);
        } else {
            self.formulas
                .insert(column_id.to_string(), canonical.to_string());
        }
    }

    /// Sets the author-facing formula; an empty string clears it.
    pub fn set_raw_formula(&mut self, column_id: &str, raw: &str) {
        if raw.is_empty() {
            self.raw_formulas.remove(column_id);
        } else {
            self.raw_formulas
                .insert(column_id.to_string(), raw.to_string());
        }
    }

    pub fn clear_formula(&mut self, column_id: &str) {
        self.formulas.remove(column_id);
        self.raw_formulas.remove(column_id);
    }

    /// Drops cached author-facing formulas whose canonical form references
    /// `variable`, so they are re-rendered from the canonical form.
    pub fn clear_raw_formulas_referencing(&mut self, variable: &str) {
        let stale: Vec<ColumnId> = self
            .formulas
            .iter()
            .filter(|(_, canonical)| formula_references(canonical, variable))
            .map(|(column_id, _)| column_id.clone())
            .collect();
        for column_id in stale {
            self.raw_formulas.remove(&column_id);
        }
    }
}
