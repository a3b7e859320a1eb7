use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::core::errors::PredictError;
use crate::core::lm::LMConfig;
use crate::core::signature::Signature;
use crate::data::{Demo, FieldValues, Prediction};

/// Whether a program stores demos itself or needs an
/// [`OptimizedProgram`](crate::predictors::OptimizedProgram) wrapper to carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramKind {
    NativeDemos,
    NeedsWrapper,
}

/// Per-call overrides merged over the client's default request config.
#[derive(Clone, Debug, Default, Builder)]
pub struct ForwardOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
    pub correlation_id: Option<String>,
}

impl ForwardOptions {
    pub fn merge_into(&self, base: &LMConfig) -> LMConfig {
        LMConfig {
            model: self.model.clone().unwrap_or_else(|| base.model.clone()),
            temperature: self.temperature.unwrap_or(base.temperature),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            timeout: self.timeout.unwrap_or(base.timeout),
            correlation_id: self
                .correlation_id
                .clone()
                .or_else(|| base.correlation_id.clone()),
        }
    }
}

/// The capability set every executable unit exposes to the optimizer.
///
/// Programs are immutable value objects: [`with_demos`](Program::with_demos)
/// and [`with_instruction`](Program::with_instruction) return new programs
/// sharing the signature, never mutate in place. `forward` is pure modulo the
/// client — the same inputs against the same client behavior produce the same
/// outputs.
#[async_trait]
pub trait Program: Send + Sync + std::fmt::Debug {
    async fn forward(
        &self,
        inputs: FieldValues,
        opts: ForwardOptions,
    ) -> Result<Prediction, PredictError>;

    /// Like [`forward`](Program::forward), but with an externally supplied
    /// demo list. The default ignores the demos and is only correct for
    /// programs whose prompt carries none; prompt-building programs override
    /// it. Wrappers use this to adjoin their demo list.
    async fn forward_with_demos(
        &self,
        inputs: FieldValues,
        demos: &[Demo],
        opts: ForwardOptions,
    ) -> Result<Prediction, PredictError> {
        let _ = demos;
        self.forward(inputs, opts).await
    }

    fn signature(&self) -> &Signature;

    fn demos(&self) -> &[Demo];

    fn with_demos(&self, demos: Vec<Demo>) -> Arc<dyn Program>;

    fn with_instruction(&self, instruction: String) -> Arc<dyn Program>;

    fn kind(&self) -> ProgramKind;

    /// Naming scheme for the predictors inside this program. A
    /// single-predictor program maps its sole predictor to `"main"`;
    /// composites report one name per leaf so strategies can target them.
    fn predictor_names(&self) -> Vec<String> {
        vec!["main".to_string()]
    }
}
