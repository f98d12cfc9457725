use serde_json::Value;
use tracing::debug;

use crate::types::{Row, TableSpec};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyStrategy {
    /// One or more columns joined with `:`; a dotted name reaches into JSON columns.
    Columns(Vec<String>),
    #[default]
    None,
}

impl KeyStrategy {
    pub fn for_table(table: &TableSpec) -> Self {
        if table.key_columns.is_empty() {
            KeyStrategy::None
        } else {
            KeyStrategy::Columns(table.key_columns.clone())
        }
    }

    pub fn extract_key(&self, row: &Row) -> Option<String> {
        match self {
            KeyStrategy::Columns(columns) => extract_composite_key(row, columns),
            KeyStrategy::None => None,
        }
    }
}

fn extract_field_value(row: &Row, field_path: &str) -> Option<String> {
    let mut parts = field_path.split('.');
    let mut current = row.get(parts.next()?)?;

    for part in parts {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in row", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(row: &Row, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::with_capacity(fields.len());

    for field in fields {
        match extract_field_value(row, field) {
            Some(value) => key_parts.push(value),
            None => {
                debug!("Missing field '{}' for row key", field);
                return None;
            }
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
