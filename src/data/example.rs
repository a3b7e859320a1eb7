use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered field-name → value map used for inputs, labels, and predictions.
pub type FieldValues = IndexMap<String, Value>;

/// A labeled datum. `input_keys` designates which fields are fed to the
/// program; the remaining fields are the label set the metric scores against.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Example {
    pub data: FieldValues,
    pub input_keys: Vec<String>,
}

impl Example {
    pub fn new(data: FieldValues, input_keys: Vec<String>) -> Self {
        Self { data, input_keys }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// The complement of `input_keys` within `data`.
    pub fn label_keys(&self) -> Vec<String> {
        self.data
            .keys()
            .filter(|key| !self.input_keys.contains(key))
            .cloned()
            .collect()
    }

    pub fn inputs(&self) -> FieldValues {
        self.data
            .iter()
            .filter(|(key, _)| self.input_keys.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn labels(&self) -> FieldValues {
        self.data
            .iter()
            .filter(|(key, _)| !self.input_keys.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
