use std::time::Duration;

use crate::data::LmUsage;

/// Coarse failure classification shared by all error kinds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    BadRequest,
    Temporary,
    BadResponse,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignatureError {
    #[error("field `{field}` is declared as both input and output")]
    OverlappingField { field: String },

    #[error("field `{field}` is declared twice")]
    DuplicateField { field: String },

    #[error("missing input field(s): {}", fields.join(", "))]
    MissingInputs { fields: Vec<String> },

    #[error("missing output field(s): {}", fields.join(", "))]
    MissingOutputs { fields: Vec<String> },

    #[error("cannot parse `{raw}` as a signature, expected `input, ... -> output, ...`")]
    InvalidShorthand { raw: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("could not reach {endpoint}")]
    Network { endpoint: String },

    #[error("rate limited by provider")]
    RateLimit { retry_after: Option<Duration> },

    #[error("provider returned HTTP {status}")]
    Server { status: u16, body: String },

    #[error("authentication rejected by provider")]
    Auth,

    #[error("provider rejected the request: {message}")]
    BadRequest { message: String },

    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("circuit open for provider `{provider}`")]
    CircuitOpen { provider: String },

    #[error("provider error from {provider}: {message}")]
    Provider { provider: String, message: String },
}

impl LmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } => ErrorClass::Temporary,
            Self::RateLimit { .. } => ErrorClass::Temporary,
            Self::Server { status, .. } if *status >= 500 => ErrorClass::Temporary,
            Self::Server { .. } => ErrorClass::BadRequest,
            Self::Auth => ErrorClass::BadRequest,
            Self::BadRequest { .. } => ErrorClass::BadRequest,
            Self::Timeout { .. } => ErrorClass::Temporary,
            Self::CircuitOpen { .. } => ErrorClass::Unavailable,
            Self::Provider { .. } => ErrorClass::Internal,
        }
    }

    /// Transient kinds are retried; a timeout already consumed its deadline and is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::RateLimit { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Auth => false,
            Self::BadRequest { .. } => false,
            Self::Timeout { .. } => false,
            Self::CircuitOpen { .. } => false,
            Self::Provider { .. } => false,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("signature declares no output fields")]
    NoOutputFields,

    #[error("output field `{field}` not found in response")]
    MissingField { field: String, raw_response: String },

    #[error("response contains no field headers for {expected} declared output fields")]
    MalformedResponse { expected: usize, raw_response: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("invalid inputs, missing: {}", missing.join(", "))]
    InvalidInputs { missing: Vec<String> },

    #[error("failed to format prompt")]
    Format {
        #[source]
        source: AdapterError,
    },

    #[error("LM call failed")]
    Lm {
        #[source]
        source: LmError,
    },

    #[error("failed to parse LM response")]
    Parse {
        #[source]
        source: AdapterError,
        raw_response: String,
        lm_usage: LmUsage,
    },
}

impl PredictError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidInputs { .. } => ErrorClass::BadRequest,
            Self::Format { .. } => ErrorClass::BadRequest,
            Self::Lm { source } => source.class(),
            Self::Parse { .. } => ErrorClass::BadResponse,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricError {
    #[error("metric returned a non-finite score")]
    NonFinite,

    #[error("metric failed: {message}")]
    Failed { message: String },
}

/// Errors surfaced by [`SIMBA::compile`](crate::optimizer::SIMBA::compile) before or
/// instead of an optimized program. Per-trajectory and per-candidate failures are
/// absorbed as zero scores and never appear here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("student program is invalid: {reason}")]
    InvalidStudentProgram { reason: String },

    #[error("teacher program is invalid: {reason}")]
    InvalidTeacherProgram { reason: String },

    #[error("trainset is empty or invalid")]
    InvalidOrEmptyTrainset,

    #[error("metric function is invalid")]
    InvalidMetricFunction,

    #[error("optimization failed: {detail}")]
    OptimizationFailed { detail: String },
}
