use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bon::Builder;

use crate::core::errors::MetricError;
use crate::core::program::{ForwardOptions, Program};
use crate::data::{Example, Prediction};
use crate::evaluate::fanout::{TaskOutcome, fan_out};

/// How you tell the optimizer what "good" means: a scalar score in `[0, 1]`
/// for a prediction against its example. Scores outside the range are clamped
/// at use sites; errors and non-finite scores become 0.0 with `success = false`.
#[async_trait]
pub trait Metric: Send + Sync {
    async fn score(&self, example: &Example, prediction: &Prediction)
    -> Result<f32, MetricError>;
}

/// Adapts a plain closure into a [`Metric`].
pub struct FnMetric<F>(pub F);

#[async_trait]
impl<F> Metric for FnMetric<F>
where
    F: Fn(&Example, &Prediction) -> Result<f32, MetricError> + Send + Sync,
{
    async fn score(
        &self,
        example: &Example,
        prediction: &Prediction,
    ) -> Result<f32, MetricError> {
        (self.0)(example, prediction)
    }
}

pub fn metric_fn<F>(f: F) -> Arc<dyn Metric>
where
    F: Fn(&Example, &Prediction) -> Result<f32, MetricError> + Send + Sync + 'static,
{
    Arc::new(FnMetric(f))
}

/// Sandboxes a raw metric outcome: finite scores are clamped into `[0, 1]`,
/// everything else is a failure scored 0.0.
pub fn sanitize_score(raw: Result<f32, MetricError>) -> (f32, bool) {
    match raw {
        Ok(score) if score.is_finite() => (score.clamp(0.0, 1.0), true),
        _ => (0.0, false),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub successes: usize,
    pub failures: usize,
    pub timeouts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// One score per example, in input order.
    pub scores: Vec<f32>,
    pub stats: EvalStats,
    pub duration: Duration,
}

impl Evaluation {
    /// Arithmetic mean of `scores`; 0.0 when empty.
    pub fn mean(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f32>() / self.scores.len() as f32
    }
}

/// Runs a program over a list of examples with a metric, under bounded
/// concurrency and a per-example deadline.
///
/// Each example is executed independently: a program error or metric error
/// contributes 0.0 and counts in `stats.failures`, a deadline miss counts in
/// `stats.timeouts`. Neither aborts the batch.
#[derive(Clone, Debug, Builder)]
pub struct Evaluator {
    #[builder(default = default_concurrency())]
    pub max_concurrency: usize,
    #[builder(default = Duration::from_secs(30))]
    pub timeout: Duration,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::builder().build()
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
        .min(20)
}

impl Evaluator {
    pub async fn evaluate(
        &self,
        program: Arc<dyn Program>,
        examples: &[Example],
        metric: Arc<dyn Metric>,
    ) -> Evaluation {
        let started = Instant::now();

        let tasks: Vec<_> = examples
            .iter()
            .cloned()
            .map(|example| {
                let program = program.clone();
                let metric = metric.clone();
                async move {
                    let prediction = program
                        .forward(example.inputs(), ForwardOptions::default())
                        .await
                        .map_err(|err| err.to_string())?;
                    let (score, success) = sanitize_score(metric.score(&example, &prediction).await);
                    if success {
                        Ok(score)
                    } else {
                        Err("metric failed or returned a non-finite score".to_string())
                    }
                }
            })
            .collect();

        let outcomes = fan_out(tasks, self.max_concurrency, self.timeout).await;

        let mut evaluation = Evaluation {
            scores: Vec::with_capacity(outcomes.len()),
            ..Evaluation::default()
        };
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Ok(score) => {
                    evaluation.stats.successes += 1;
                    evaluation.scores.push(score);
                }
                TaskOutcome::Err(reason) => {
                    tracing::debug!(reason = %reason, "example evaluation failed");
                    evaluation.stats.failures += 1;
                    evaluation.scores.push(0.0);
                }
                TaskOutcome::TimedOut => {
                    evaluation.stats.timeouts += 1;
                    evaluation.scores.push(0.0);
                }
            }
        }
        evaluation.duration = started.elapsed();
        evaluation
    }
}
