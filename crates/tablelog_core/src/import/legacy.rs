//! Early change-shape migration.
//!
//! Early logs wrote Create/Columns and Create/Rows payloads as a bare array
//! (or a single object) instead of `{"columns": [...]}` / `{"rows": [...]}`.
//! Only entries in that shape are rewritten; every other entry is returned
//! byte-identical.

use log::info;
use serde_json::{Map, Value};

fn early_wrapper_key(change: &Map<String, Value>) -> Option<&'static str> {
    if change.get("action").and_then(Value::as_str) != Some("create") {
        return None;
    }
    let key = match change.get("target").and_then(Value::as_str) {
        Some("columns") => "columns",
        Some("rows") => "rows",
        _ => return None,
    };
    match change.get("props") {
        Some(Value::Object(props)) if props.contains_key(key) => None,
        Some(Value::Array(_)) | Some(Value::Object(_)) => Some(key),
        _ => None,
    }
}

fn migrate_entry(entry: &str) -> Option<String> {
    let Ok(Value::Object(mut change)) = serde_json::from_str::<Value>(entry) else {
        return None;
    };
    let key = early_wrapper_key(&change)?;
    let props = match change.remove("props") {
        Some(Value::Array(items)) => Value::Array(items),
        Some(other) => Value::Array(vec![other]),
        None => return None,
    };
    let mut wrapped = Map::new();
    wrapped.insert(key.to_string(), props);
    change.insert("props".to_string(), Value::Object(wrapped));
    if let Some(Value::String(id)) = change.get("ids").cloned() {
        change.insert("ids".to_string(), Value::Array(vec![Value::String(id)]));
    }
    serde_json::to_string(&Value::Object(change)).ok()
}

/// Returns whether any entry is in an early shape.
pub fn is_migration_required(log: &[String]) -> bool {
    log.iter().any(|entry| {
        matches!(
            serde_json::from_str::<Value>(entry),
            Ok(Value::Object(change)) if early_wrapper_key(&change).is_some()
        )
    })
}

/// Rewrites early-shape entries; idempotent.
pub fn migrate_changes(log: &[String]) -> Vec<String> {
    let mut migrated = 0usize;
    let result = log
        .iter()
        .map(|entry| match migrate_entry(entry) {
            Some(rewritten) => {
                migrated += 1;
                rewritten
            }
            None => entry.clone(),
        })
        .collect();
    if migrated > 0 {
        info!(
            "event=log_migrate module=import status=ok entries={} migrated={}",
            log.len(),
            migrated
        );
    }
    result
}
