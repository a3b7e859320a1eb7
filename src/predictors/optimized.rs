use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::core::errors::PredictError;
use crate::core::program::{ForwardOptions, Program, ProgramKind};
use crate::core::signature::Signature;
use crate::data::{Demo, FieldValues, Prediction};

/// Adjoins a demo list and strategy metadata to a program that lacks native
/// demo storage. Forwarding delegates to the inner program with the adjoined
/// demos supplied externally.
#[derive(Clone, Debug)]
pub struct OptimizedProgram {
    inner: Arc<dyn Program>,
    demos: Vec<Demo>,
    metadata: IndexMap<String, Value>,
}

impl OptimizedProgram {
    pub fn new(inner: Arc<dyn Program>, demos: Vec<Demo>) -> Self {
        Self {
            inner,
            demos,
            metadata: IndexMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn metadata(&self) -> &IndexMap<String, Value> {
        &self.metadata
    }

    pub fn inner(&self) -> &Arc<dyn Program> {
        &self.inner
    }
}

#[async_trait]
impl Program for OptimizedProgram {
    async fn forward(
        &self,
        inputs: FieldValues,
        opts: ForwardOptions,
    ) -> Result<Prediction, PredictError> {
        self.inner
            .forward_with_demos(inputs, &self.demos, opts)
            .await
    }

    async fn forward_with_demos(
        &self,
        inputs: FieldValues,
        demos: &[Demo],
        opts: ForwardOptions,
    ) -> Result<Prediction, PredictError> {
        self.inner.forward_with_demos(inputs, demos, opts).await
    }

    fn signature(&self) -> &Signature {
        self.inner.signature()
    }

    fn demos(&self) -> &[Demo] {
        &self.demos
    }

    fn with_demos(&self, demos: Vec<Demo>) -> Arc<dyn Program> {
        Arc::new(Self {
            demos,
            ..self.clone()
        })
    }

    fn with_instruction(&self, instruction: String) -> Arc<dyn Program> {
        Arc::new(Self {
            inner: self.inner.with_instruction(instruction),
            ..self.clone()
        })
    }

    /// The wrapper itself stores demos, so downstream strategies treat it as native.
    fn kind(&self) -> ProgramKind {
        ProgramKind::NativeDemos
    }

    fn predictor_names(&self) -> Vec<String> {
        self.inner.predictor_names()
    }
}
