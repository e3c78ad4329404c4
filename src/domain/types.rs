use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single observed value inside an update record.
///
/// Archive CSVs are untyped text. Values that parse as numbers are promoted
/// to `Number`; everything else ("NYSE", "AAA") stays `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Best-effort typed coercion: numeric-looking strings become `Number`,
    /// anything else is kept verbatim as `Text`.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) => FieldValue::Number(n),
            Err(_) => FieldValue::Text(raw.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One observed data point for one instrument at one instant.
///
/// The timestamp column is structural and never appears in `fields`.
/// Records are built once per input row and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub instrument_id: String,
    pub time_of_update: NaiveDateTime,
    pub fields: HashMap<String, FieldValue>,
}

impl UpdateRecord {
    /// Numeric value of a field, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_number)
    }

    /// Text value of a field, if present and non-numeric.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_text)
    }
}

/// All update records partitioned by exact timestamp, ascending. Every input
/// record lands in exactly one group; within a group records may belong to
/// different instruments.
pub type GroupedUpdates = Vec<(NaiveDateTime, Vec<UpdateRecord>)>;
