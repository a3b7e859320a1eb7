use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::ChatAdapter;
use crate::core::errors::{PredictError, SignatureError};
use crate::core::lm::LM;
use crate::core::program::{ForwardOptions, Program, ProgramKind};
use crate::core::signature::Signature;
use crate::data::{Demo, FieldValues, Prediction};

/// The leaf program: one signature, one client, one LM call per `forward`.
///
/// Execution path: validate inputs against the signature, format via
/// [`ChatAdapter`], call the client with the per-call options merged over the
/// client defaults, parse the completion. Each step propagates its typed
/// error unchanged.
#[derive(Clone, Debug)]
pub struct Predict {
    signature: Signature,
    client: Arc<LM>,
    adapter: ChatAdapter,
    demos: Vec<Demo>,
    instruction_override: Option<String>,
}

impl Predict {
    pub fn new(signature: Signature, client: Arc<LM>) -> Self {
        Self {
            signature,
            client,
            adapter: ChatAdapter,
            demos: Vec::new(),
            instruction_override: None,
        }
    }

    pub fn client(&self) -> &Arc<LM> {
        &self.client
    }

    /// The instruction installed by [`with_instruction`](Program::with_instruction),
    /// if any. The exposed signature already reflects it.
    pub fn instruction_override(&self) -> Option<&str> {
        self.instruction_override.as_deref()
    }
}

#[async_trait]
impl Program for Predict {
    async fn forward(
        &self,
        inputs: FieldValues,
        opts: ForwardOptions,
    ) -> Result<Prediction, PredictError> {
        self.forward_with_demos(inputs, &self.demos, opts).await
    }

    async fn forward_with_demos(
        &self,
        inputs: FieldValues,
        demos: &[Demo],
        opts: ForwardOptions,
    ) -> Result<Prediction, PredictError> {
        self.signature
            .validate_inputs(&inputs)
            .map_err(|err| match err {
                SignatureError::MissingInputs { fields } => {
                    PredictError::InvalidInputs { missing: fields }
                }
                other => PredictError::InvalidInputs {
                    missing: vec![other.to_string()],
                },
            })?;

        let chat = self
            .adapter
            .format(&self.signature, demos, &inputs)
            .map_err(|source| PredictError::Format { source })?;

        let config = opts.merge_into(&self.client.default_config);
        let response = self
            .client
            .request(&chat, &config)
            .await
            .map_err(|source| PredictError::Lm { source })?;

        let mut prediction = self
            .adapter
            .parse(&self.signature, &response.completion)
            .map_err(|source| PredictError::Parse {
                source,
                raw_response: response.completion.clone(),
                lm_usage: response.usage.clone(),
            })?;
        prediction.set_lm_usage(response.usage);
        Ok(prediction)
    }

    fn signature(&self) -> &Signature {
        &self.signature
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

    /// Replaces the signature's instruction; the old signature value is
    /// untouched, the new program carries a new one.
    fn with_instruction(&self, instruction: String) -> Arc<dyn Program> {
        Arc::new(Self {
            signature: self.signature.with_instruction(instruction.clone()),
            instruction_override: Some(instruction),
            ..self.clone()
        })
    }

    fn kind(&self) -> ProgramKind {
        ProgramKind::NativeDemos
    }
}
