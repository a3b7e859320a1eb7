use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::example::FieldValues;

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct LmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LmUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Structured output of one program execution.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Prediction {
    pub data: FieldValues,
    pub lm_usage: LmUsage,
}

impl Prediction {
    pub fn new(data: FieldValues) -> Self {
        Self {
            data,
            lm_usage: LmUsage::default(),
        }
    }

    pub fn set_lm_usage(&mut self, lm_usage: LmUsage) {
        self.lm_usage = lm_usage;
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
}
