use std::time::Duration;

use bon::Builder;

/// Tunable inference parameters applied to each request.
///
/// `model` carries the provider prefix (`"provider:model"`); the prefix keys
/// the circuit-breaker state in [`LM`](crate::core::lm::LM).
#[derive(Clone, Debug, PartialEq, Builder)]
pub struct LMConfig {
    #[builder(default = "dummy:local".to_string())]
    pub model: String,
    /// Sampling temperature. Higher values increase randomness.
    #[builder(default = 0.7)]
    pub temperature: f32,
    #[builder(default = 512)]
    pub max_tokens: u32,
    #[builder(default = Duration::from_millis(30_000))]
    pub timeout: Duration,
    pub correlation_id: Option<String>,
}

impl LMConfig {
    /// The provider part of `model`, or the whole string when unprefixed.
    pub fn provider(&self) -> &str {
        self.model
            .split_once(':')
            .map(|(provider, _)| provider)
            .unwrap_or(&self.model)
    }
}

impl Default for LMConfig {
    fn default() -> Self {
        LMConfig::builder().build()
    }
}
