use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An orderable cursor value read from a table's cursor column.
///
/// Values of different variants never appear for the same table; the
/// variant of a table's lower bound decides how the source binds and reads
/// the cursor column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CursorValue {
    Integer(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Integer,
    Timestamp,
    Text,
}

impl CursorKind {
    /// PostgreSQL type the cursor column is compared and read as.
    pub fn sql_type(self) -> &'static str {
        match self {
            CursorKind::Integer => "bigint",
            CursorKind::Timestamp => "timestamptz",
            CursorKind::Text => "text",
        }
    }
}

impl CursorValue {
    /// The default floor: `1970-01-01T00:00:00Z`.
    pub fn epoch() -> Self {
        CursorValue::Timestamp(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Parses a configured value.
    ///
    /// Tries RFC 3339, a bare `YYYY-MM-DD` date (midnight UTC), a
    /// `YYYY-MM-DD HH:MM:SS[.f]` naive timestamp (UTC), then an integer, and
    /// falls back to text.
    pub fn parse(input: &str) -> Self {
        let s = input.trim();

        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return CursorValue::Timestamp(ts.with_timezone(&Utc));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return CursorValue::Timestamp(midnight.and_utc());
            }
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return CursorValue::Timestamp(naive.and_utc());
        }
        if let Ok(n) = s.parse::<i64>() {
            return CursorValue::Integer(n);
        }

        CursorValue::Text(s.to_string())
    }

    pub fn kind(&self) -> CursorKind {
        match self {
            CursorValue::Integer(_) => CursorKind::Integer,
            CursorValue::Timestamp(_) => CursorKind::Timestamp,
            CursorValue::Text(_) => CursorKind::Text,
        }
    }

    /// Text form bound as a query parameter and cast server-side.
    pub fn to_sql_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Integer(n) => write!(f, "{}", n),
            CursorValue::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            CursorValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for CursorValue {
    fn from(n: i64) -> Self {
        CursorValue::Integer(n)
    }
}

impl From<DateTime<Utc>> for CursorValue {
    fn from(ts: DateTime<Utc>) -> Self {
        CursorValue::Timestamp(ts)
    }
}

/// A table to replicate and the column that delimits "new since last run".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name, optionally schema-qualified (`schema.table`).
    pub name: String,
    pub cursor_column: String,
    /// Per-table floor overriding the global default.
    pub initial_value: Option<CursorValue>,
    /// Columns used to key messages in sinks that support keys.
    pub key_columns: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, cursor_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cursor_column: cursor_column.into(),
            initial_value: None,
            key_columns: Vec::new(),
        }
    }

    pub fn with_initial_value(mut self, value: CursorValue) -> Self {
        self.initial_value = Some(value);
        self
    }

    pub fn with_key_columns(mut self, columns: Vec<String>) -> Self {
        self.key_columns = columns;
        self
    }

    pub fn key(&self) -> WatermarkKey {
        WatermarkKey::new(&self.name, &self.cursor_column)
    }

    /// The floor for this table: its own initial value or the global default.
    pub fn floor(&self, default_floor: &CursorValue) -> CursorValue {
        self.initial_value
            .clone()
            .unwrap_or_else(|| default_floor.clone())
    }

    /// Destination name; the source table name without its schema.
    pub fn destination_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn quoted_name(&self) -> String {
        self.name
            .split('.')
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn quoted_cursor_column(&self) -> String {
        quote_ident(&self.cursor_column)
    }
}

/// Key of one watermark record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatermarkKey {
    pub table: String,
    pub cursor_column: String,
}

impl WatermarkKey {
    pub fn new(table: impl Into<String>, cursor_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            cursor_column: cursor_column.into(),
        }
    }
}

impl fmt::Display for WatermarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.cursor_column)
    }
}

/// A persisted watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub table: String,
    pub cursor_column: String,
    pub value: CursorValue,
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(key: &WatermarkKey, value: CursorValue) -> Self {
        Self {
            table: key.table.clone(),
            cursor_column: key.cursor_column.clone(),
            value,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> WatermarkKey {
        WatermarkKey::new(&self.table, &self.cursor_column)
    }
}

/// One extracted row.
///
/// Fields keep source column order and are passed through untouched; only
/// the cursor value is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    cursor: CursorValue,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Row {
    pub fn new(cursor: CursorValue, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { cursor, fields }
    }

    pub fn cursor(&self) -> &CursorValue {
        &self.cursor
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.fields
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.fields.get(column)
    }

    pub fn into_fields(self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
    }
}

/// Checks a possibly schema-qualified SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }

    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
            }
            _ => false,
        }
    })
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
