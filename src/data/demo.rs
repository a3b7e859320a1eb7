use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::example::FieldValues;

/// Byte budget applied to each string field when a demo is constructed.
pub const DEFAULT_DEMO_FIELD_BUDGET: usize = 100_000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DemoMetadata {
    pub origin_score: f32,
    pub created_at: DateTime<Utc>,
    pub strategy: String,
}

/// A few-shot exemplar attached to a program. Structurally an [`Example`]
/// (field map plus designated input keys) with provenance metadata.
///
/// [`Example`]: crate::data::Example
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Demo {
    pub data: FieldValues,
    pub input_keys: Vec<String>,
    pub metadata: Option<DemoMetadata>,
}

impl Demo {
    pub fn new(data: FieldValues, input_keys: Vec<String>) -> Self {
        Self::with_budget(data, input_keys, DEFAULT_DEMO_FIELD_BUDGET)
    }

    /// Builds a demo, truncating every string field to `budget` bytes.
    pub fn with_budget(data: FieldValues, input_keys: Vec<String>, budget: usize) -> Self {
        let data = data
            .into_iter()
            .map(|(key, value)| (key, truncate_value(value, budget)))
            .collect();

        Self {
            data,
            input_keys,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: DemoMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn inputs(&self) -> FieldValues {
        self.data
            .iter()
            .filter(|(key, _)| self.input_keys.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn outputs(&self) -> FieldValues {
        self.data
            .iter()
            .filter(|(key, _)| !self.input_keys.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn truncate_value(value: Value, budget: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_bytes(&s, budget).to_string()),
        other => other,
    }
}

/// Truncates to at most `max_bytes`, backing off to the nearest char boundary.
pub(crate) fn truncate_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut cutoff = max_bytes;
    while cutoff > 0 && !value.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    &value[..cutoff]
}
