use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::LmError;
use crate::core::lm::{Chat, LMClient, LMConfig, LMResponse};

type Handler = Arc<dyn Fn(&Chat, &LMConfig) -> Result<LMResponse, LmError> + Send + Sync>;

/// Stable fingerprint of a request, keyed on the messages and the
/// behavior-relevant config fields (`correlation_id` is telemetry-only and
/// excluded).
pub fn request_fingerprint(chat: &Chat, config: &LMConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.model.hash(&mut hasher);
    config.temperature.to_bits().hash(&mut hasher);
    config.max_tokens.hash(&mut hasher);
    for message in chat.iter() {
        message.role().hash(&mut hasher);
        message.content().hash(&mut hasher);
    }
    hasher.finish()
}

/// Deterministic test-mode client. Three modes:
///
/// - `fixed`: one canned completion for every request.
/// - `programmed`: a completion table keyed by [`request_fingerprint`], with
///   an optional fallback for unmatched requests.
/// - `from_fn`: a handler closure, for scripted failure sequences.
#[derive(Clone)]
pub struct DummyProvider {
    mode: Mode,
}

#[derive(Clone)]
enum Mode {
    Fixed(String),
    Programmed {
        table: HashMap<u64, String>,
        fallback: Option<String>,
    },
    Handler(Handler),
}

impl DummyProvider {
    pub fn fixed(completion: impl Into<String>) -> Self {
        Self {
            mode: Mode::Fixed(completion.into()),
        }
    }

    pub fn programmed() -> Self {
        Self {
            mode: Mode::Programmed {
                table: HashMap::new(),
                fallback: None,
            },
        }
    }

    /// Registers a canned completion for the exact `(chat, config)` pair.
    pub fn respond_to(mut self, chat: &Chat, config: &LMConfig, completion: impl Into<String>) -> Self {
        if let Mode::Programmed { table, .. } = &mut self.mode {
            table.insert(request_fingerprint(chat, config), completion.into());
        }
        self
    }

    /// Completion returned when no table entry matches.
    pub fn or_fallback(mut self, completion: impl Into<String>) -> Self {
        if let Mode::Programmed { fallback, .. } = &mut self.mode {
            *fallback = Some(completion.into());
        }
        self
    }

    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&Chat, &LMConfig) -> Result<LMResponse, LmError> + Send + Sync + 'static,
    {
        Self {
            mode: Mode::Handler(Arc::new(handler)),
        }
    }
}

#[async_trait]
impl LMClient for DummyProvider {
    async fn request(&self, chat: &Chat, config: &LMConfig) -> Result<LMResponse, LmError> {
        match &self.mode {
            Mode::Fixed(completion) => Ok(LMResponse {
                completion: completion.clone(),
                ..LMResponse::default()
            }),
            Mode::Programmed { table, fallback } => {
                let fingerprint = request_fingerprint(chat, config);
                match table.get(&fingerprint).or(fallback.as_ref()) {
                    Some(completion) => Ok(LMResponse {
                        completion: completion.clone(),
                        ..LMResponse::default()
                    }),
                    None => Err(LmError::Provider {
                        provider: config.provider().to_string(),
                        message: format!("no canned completion for fingerprint {fingerprint}"),
                    }),
                }
            }
            Mode::Handler(handler) => handler(chat, config),
        }
    }
}
