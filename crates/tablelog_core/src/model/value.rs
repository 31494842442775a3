//! Cell value model.
//!
//! # Responsibility
//! - Represent one table cell, including the formula error sentinel.
//! - Provide the numeric coercion rules shared by formulas and link gating.
//!
//! # Invariants
//! - `Error` is derived state only; it serializes as `null` and is never
//!   produced by deserialization.
//! - Numeric text follows plain decimal/exponent notation; `inf`/`nan`
//!   spellings are text, not numbers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

static NUMERIC_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("valid numeric text regex")
});

/// One cell of a table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellValue {
    /// No value. Distinct from numeric zero and from `Error`.
    #[default]
    Empty,
    Number(f64),
    Text(String),
    /// Formula evaluation failed or produced a non-finite result.
    Error,
}

impl CellValue {
    /// Returns whether this cell holds no content.
    ///
    /// Empty text counts as empty, matching authored tables that store `""`.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns the finite numeric value of this cell, coercing numeric text.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) if value.is_finite() => Some(*value),
            Self::Text(text) => parse_numeric_text(text),
            _ => None,
        }
    }

    /// Returns whether the cell can be mirrored onto a coordinate plot.
    pub fn is_linkable(&self) -> bool {
        self.is_empty() || self.as_number().is_some()
    }

    /// Converts numeric text to a number; other values are returned unchanged.
    pub fn canonicalize(&self) -> CellValue {
        match self {
            Self::Text(text) => match parse_numeric_text(text) {
                Some(value) => Self::Number(value),
                None => self.clone(),
            },
            other => other.clone(),
        }
    }
}

/// Parses JS-style numeric text (`"1"`, `" -2.5e3 "`, `".5"`).
pub fn parse_numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if !NUMERIC_TEXT_RE.is_match(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

impl Display for CellValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text}"),
            Self::Error => write!(f, "#ERR"),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(value) if value.is_finite() => serializer.serialize_f64(*value),
            Self::Text(text) => serializer.serialize_str(text),
            _ => serializer.serialize_none(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireCell {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Option::<WireCell>::deserialize(deserializer)?;
        Ok(match wire {
            None => Self::Empty,
            Some(WireCell::Number(value)) => Self::Number(value),
            Some(WireCell::Text(text)) => Self::Text(text),
            Some(WireCell::Bool(flag)) => Self::Text(flag.to_string()),
        })
    }
}
