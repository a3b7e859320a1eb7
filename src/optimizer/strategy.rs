use std::fmt;
use std::sync::Arc;

use bon::Builder;
use chrono::Utc;
use rand::rngs::StdRng;
use serde_json::{Value, json};

use crate::core::program::{Program, ProgramKind};
use crate::data::demo::{DEFAULT_DEMO_FIELD_BUDGET, Demo, DemoMetadata, truncate_bytes};
use crate::data::example::FieldValues;
use crate::optimizer::sampling::poisson_sample;
use crate::optimizer::trajectory::Bucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyBucket,
    BelowQualityThreshold,
    DemoConstructionFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EmptyBucket => "empty_bucket",
            SkipReason::BelowQualityThreshold => "below_quality_threshold",
            SkipReason::DemoConstructionFailed => "demo_construction_failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum StrategyOutcome {
    Candidate(Arc<dyn Program>),
    Skip(SkipReason),
}

/// Context handed to a strategy application. The RNG is a per-application
/// sub-RNG seeded from `(loop_seed, step, example index)`; strategies never
/// touch the loop RNG. `predictor_names` carries the program's predictor
/// naming scheme so strategies can target individual predictors of a
/// composite.
pub struct StrategyContext<'a> {
    pub rng: &'a mut StdRng,
    pub predictor_names: &'a [String],
}

/// A transformation from `(bucket, source program)` to a candidate program.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_applicable(&self, bucket: &Bucket) -> bool;

    fn apply(
        &self,
        bucket: &Bucket,
        source: &Arc<dyn Program>,
        ctx: &mut StrategyContext<'_>,
    ) -> StrategyOutcome;
}

/// Builds a candidate by distilling the bucket's best trajectory into a new
/// demo: drop a Poisson-distributed number of the source's demos, prepend the
/// new one, cap the list at `max_demos`.
#[derive(Clone, Debug, Builder)]
pub struct AppendDemo {
    #[builder(default = 4)]
    pub max_demos: usize,
    #[builder(default = DEFAULT_DEMO_FIELD_BUDGET)]
    pub demo_input_field_maxlen: usize,
    #[builder(default = 0.7)]
    pub quality_threshold: f32,
}

impl Default for AppendDemo {
    fn default() -> Self {
        AppendDemo::builder().build()
    }
}

impl Strategy for AppendDemo {
    fn name(&self) -> &'static str {
        "append_demo"
    }

    fn is_applicable(&self, bucket: &Bucket) -> bool {
        !bucket.is_empty() && bucket.best().score >= self.quality_threshold
    }

    fn apply(
        &self,
        bucket: &Bucket,
        source: &Arc<dyn Program>,
        ctx: &mut StrategyContext<'_>,
    ) -> StrategyOutcome {
        if bucket.is_empty() {
            return StrategyOutcome::Skip(SkipReason::EmptyBucket);
        }
        let best = bucket.best();
        if best.score < self.quality_threshold {
            return StrategyOutcome::Skip(SkipReason::BelowQualityThreshold);
        }
        let Some(outputs) = &best.outputs else {
            return StrategyOutcome::Skip(SkipReason::DemoConstructionFailed);
        };
        if best.inputs.is_empty() || outputs.is_empty() {
            return StrategyOutcome::Skip(SkipReason::DemoConstructionFailed);
        }

        // Truncated inputs merged with outputs; the inputs' keys stay the
        // demo's input keys.
        let mut merged: FieldValues = best.inputs.clone();
        for (key, value) in outputs {
            merged.insert(key.clone(), value.clone());
        }
        let input_keys: Vec<String> = best.inputs.keys().cloned().collect();
        let demo = Demo::with_budget(merged, input_keys, self.demo_input_field_maxlen)
            .with_metadata(DemoMetadata {
                origin_score: best.score,
                created_at: Utc::now(),
                strategy: self.name().to_string(),
            });

        let kept = self.drop_demos(source.demos(), ctx.rng);

        let mut demos = Vec::with_capacity(kept.len() + 1);
        demos.push(demo);
        demos.extend(kept);
        demos.truncate(self.max_demos.max(1));

        let candidate: Arc<dyn Program> = match source.kind() {
            ProgramKind::NativeDemos => source.with_demos(demos),
            ProgramKind::NeedsWrapper => Arc::new(
                crate::predictors::OptimizedProgram::new(source.clone(), demos)
                    .with_metadata("strategy", json!(self.name()))
                    .with_metadata("origin_score", json!(best.score)),
            ),
        };
        StrategyOutcome::Candidate(candidate)
    }
}

impl AppendDemo {
    /// Poisson drop with `λ = n / max(max_demos, 1)`; at least one demo is
    /// dropped when the list is already at or over capacity.
    fn drop_demos(&self, demos: &[Demo], rng: &mut StdRng) -> Vec<Demo> {
        let n = demos.len();
        if n == 0 {
            return Vec::new();
        }

        let max_demos_tmp = self.max_demos.max(1);
        let lambda = n as f64 / max_demos_tmp as f64;
        let mut drop_count = poisson_sample(rng, lambda);
        if n >= max_demos_tmp {
            drop_count = drop_count.max(1);
        }
        drop_count = drop_count.min(n);

        let dropped = rand::seq::index::sample(rng, n, drop_count).into_vec();
        demos
            .iter()
            .enumerate()
            .filter(|(index, _)| !dropped.contains(index))
            .map(|(_, demo)| demo.clone())
            .collect()
    }
}

/// Instruction-refinement supplement: appends a rule distilled from the
/// contrast between the bucket's best and worst trajectories to the source's
/// instruction. Template-built, no extra LM call. Not registered by default.
#[derive(Clone, Debug, Builder)]
pub struct AppendRule {
    #[builder(default = 0.7)]
    pub quality_threshold: f32,
    #[builder(default = 0.05)]
    pub min_gap: f32,
    #[builder(default = 200)]
    pub summary_maxlen: usize,
}

impl Default for AppendRule {
    fn default() -> Self {
        AppendRule::builder().build()
    }
}

impl Strategy for AppendRule {
    fn name(&self) -> &'static str {
        "append_rule"
    }

    fn is_applicable(&self, bucket: &Bucket) -> bool {
        !bucket.is_empty()
            && bucket.best().score >= self.quality_threshold
            && bucket.max_to_min_gap >= self.min_gap
    }

    fn apply(
        &self,
        bucket: &Bucket,
        source: &Arc<dyn Program>,
        _ctx: &mut StrategyContext<'_>,
    ) -> StrategyOutcome {
        if bucket.is_empty() {
            return StrategyOutcome::Skip(SkipReason::EmptyBucket);
        }
        let best = bucket.best();
        if best.score < self.quality_threshold || bucket.max_to_min_gap < self.min_gap {
            return StrategyOutcome::Skip(SkipReason::BelowQualityThreshold);
        }
        let Some(best_outputs) = &best.outputs else {
            return StrategyOutcome::Skip(SkipReason::DemoConstructionFailed);
        };

        let worst = bucket.worst();
        let rule = format!(
            "Guideline (scored {:.2} vs {:.2} on the same input): for inputs such as {}, produce outputs such as {}.",
            best.score,
            worst.score,
            self.summarize(&best.inputs),
            self.summarize(best_outputs),
        );

        let instruction = source.signature().instruction.clone();
        let new_instruction = if instruction.is_empty() {
            rule
        } else {
            format!("{instruction}\n\n{rule}")
        };
        StrategyOutcome::Candidate(source.with_instruction(new_instruction))
    }
}

impl AppendRule {
    fn summarize(&self, fields: &FieldValues) -> String {
        let rendered = fields
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join("; ");
        format!("`{}`", truncate_bytes(&rendered, self.summary_maxlen))
    }
}

/// Ordered strategy list. For each bucket the first strategy that produces a
/// candidate wins; a skip advances to the next strategy; all-skip drops the
/// bucket.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn apply_first(
        &self,
        bucket: &Bucket,
        source: &Arc<dyn Program>,
        ctx: &mut StrategyContext<'_>,
    ) -> Option<(Arc<dyn Program>, &'static str)> {
        for strategy in &self.strategies {
            if !strategy.is_applicable(bucket) {
                tracing::debug!(
                    strategy = strategy.name(),
                    example_index = bucket.example_index,
                    "strategy not applicable"
                );
                continue;
            }
            match strategy.apply(bucket, source, ctx) {
                StrategyOutcome::Candidate(candidate) => {
                    return Some((candidate, strategy.name()));
                }
                StrategyOutcome::Skip(reason) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        example_index = bucket.example_index,
                        reason = reason.as_str(),
                        "strategy skipped bucket"
                    );
                }
            }
        }
        None
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new(vec![Arc::new(AppendDemo::default())])
    }
}
