//! Core use-case services.
//!
//! # Responsibility
//! - Compose replay, formulas and the link protocol into per-tile APIs.
//! - Keep host layers decoupled from log and wire details.

pub mod table_content;
