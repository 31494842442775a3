//! Table domain model.
//!
//! # Responsibility
//! - Define the change record, the materialized dataset and per-tile metadata.
//! - Keep wire-shape concerns inside `change` so the rest of the crate works on
//!   typed values.
//!
//! # Invariants
//! - Row and column ids are unique within one table and never reused.
//! - The change log is append-only; the dataset is always derived from it.

pub mod change;
pub mod dataset;
pub mod metadata;
pub mod value;
