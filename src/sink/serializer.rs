use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::types::Row;
use crate::Result;

/// Per-load columns appended to every record.
#[derive(Debug, Clone)]
pub struct LoadMetadata {
    pub load_id: String,
    pub extracted_at: DateTime<Utc>,
}

impl LoadMetadata {
    pub fn new(load_id: &str) -> Self {
        Self {
            load_id: load_id.to_string(),
            extracted_at: Utc::now(),
        }
    }
}

pub struct JsonSerializer;

impl JsonSerializer {
    /// One compact JSON object: the row's columns in source order, then
    /// `_load_id` and `_extracted_at`.
    pub fn serialize(row: &Row, meta: &LoadMetadata) -> Result<String> {
        let mut record = row.fields().clone();
        record.insert("_load_id".to_string(), Value::String(meta.load_id.clone()));
        record.insert(
            "_extracted_at".to_string(),
            Value::String(meta.extracted_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );

        serde_json::to_string(&Value::Object(record)).map_err(Into::into)
    }
}
