//! Per-table configuration.

/// Options fixed when a `TableContent` is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Mutations become no-ops when set.
    pub read_only: bool,
    /// Prefix for partner-facing row labels (`p1`, `p2`, ...).
    pub row_label_prefix: String,
    /// Column names used by `TableContent::with_default_columns`.
    pub default_column_names: Vec<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            row_label_prefix: "p".to_string(),
            default_column_names: vec!["x".to_string(), "y".to_string()],
        }
    }
}

impl TableConfig {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Label shown to partners for the row at `index`.
    pub fn row_label(&self, index: usize) -> String {
        format!("{}{}", self.row_label_prefix, index + 1)
    }
}
