use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "simba_rs=debug";

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("cannot parse tracing filter directive `{0}`")]
    BadDirective(String),
}

/// Installs a process-global subscriber for the crate's tracing output.
///
/// A valid `RUST_LOG` wins; anything else falls back to `simba_rs=debug`.
/// Safe to call more than once: when a global subscriber is already
/// installed, ours or anyone else's, the call leaves it in place.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|_| TelemetryInitError::BadDirective(DEFAULT_FILTER.to_string()))?;

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    // Err means the global slot is taken; that existing subscriber stays.
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
}

/// Lifecycle events emitted by the optimizer. Fire-and-forget: the core
/// emits, handlers observe, nothing feeds back into optimization.
#[derive(Debug, Clone)]
pub enum SimbaEvent {
    Start {
        trainset_size: usize,
        max_steps: usize,
        bsize: usize,
        num_candidates: usize,
    },
    Stop {
        duration: Duration,
        success: bool,
        reason: Option<StopReason>,
    },
    IterationStart {
        step: usize,
    },
    IterationStop {
        step: usize,
    },
    TrajectorySampled {
        trajectory_count: usize,
    },
    BucketCreated {
        bucket_count: usize,
    },
    StrategyApplied {
        candidates_created: usize,
    },
    Error {
        error_kind: String,
        description: String,
    },
}

impl SimbaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SimbaEvent::Start { .. } => "optimizer.start",
            SimbaEvent::Stop { .. } => "optimizer.stop",
            SimbaEvent::IterationStart { .. } => "optimizer.iteration.start",
            SimbaEvent::IterationStop { .. } => "optimizer.iteration.stop",
            SimbaEvent::TrajectorySampled { .. } => "optimizer.trajectory.sampled",
            SimbaEvent::BucketCreated { .. } => "optimizer.bucket.created",
            SimbaEvent::StrategyApplied { .. } => "optimizer.strategy.applied",
            SimbaEvent::Error { .. } => "optimizer.error",
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SimbaEvent) + Send + Sync>;

/// Fans events out to `tracing` and to registered handlers. A panicking
/// handler is caught and swallowed with a debug log; telemetry failures never
/// affect optimization.
#[derive(Clone)]
pub struct EventSink {
    correlation_id: String,
    handlers: Vec<EventHandler>,
}

impl EventSink {
    pub fn new(correlation_id: String, handlers: Vec<EventHandler>) -> Self {
        Self {
            correlation_id,
            handlers,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn emit(&self, event: SimbaEvent) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            event = event.name(),
            detail = ?event,
            "optimizer event"
        );
        for handler in &self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::debug!(
                    correlation_id = %self.correlation_id,
                    event = event.name(),
                    "telemetry handler panicked"
                );
            }
        }
    }
}

/// Cuts off after `max_chars` characters, never inside one.
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => &value[..byte_offset],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn panicking_handler_is_swallowed() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let sink = EventSink::new(
            "test".to_string(),
            vec![
                Arc::new(|_| panic!("handler crash")),
                Arc::new(move |_| {
                    seen_clone.fetch_add(1, Ordering::SeqCst);
                }),
            ],
        );

        sink.emit(SimbaEvent::IterationStart { step: 0 });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("héllo", 10), "héllo");
    }
}
