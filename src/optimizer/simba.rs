use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bon::Builder;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use uuid::Uuid;

use crate::core::errors::CompileError;
use crate::core::lm::LMConfig;
use crate::core::program::{ForwardOptions, Program};
use crate::data::demo::DEFAULT_DEMO_FIELD_BUDGET;
use crate::data::Example;
use crate::evaluate::{Evaluator, Metric, TaskOutcome, fan_out, sanitize_score};
use crate::optimizer::sampling::{derive_seed, softmax_sample};
use crate::optimizer::strategy::{AppendDemo, Strategy, StrategyContext, StrategyRegistry};
use crate::optimizer::trajectory::{Bucket, Trajectory, group_into_buckets};
use crate::utils::telemetry::{EventHandler, EventSink, SimbaEvent, StopReason};

/// Base sampling temperature; the first model variant of every step uses it.
const BASE_TEMPERATURE: f32 = 0.7;
/// Viability thresholds for candidate-generation buckets.
const VIABLE_MIN_GAP: f32 = 0.01;
const VIABLE_MIN_MAX_SCORE: f32 = 0.1;
/// Per-trajectory and per-candidate-example deadline within a step.
const STEP_TASK_TIMEOUT: Duration = Duration::from_secs(30);
const CANDIDATE_EVAL_CONCURRENCY: usize = 10;
/// Final winner-selection pass.
const FINAL_EVAL_CONCURRENCY: usize = 5;
const FINAL_EVAL_TIMEOUT: Duration = Duration::from_secs(60);
const FINAL_SUBSAMPLE: usize = 50;

/// Which per-program scores feed the softmax that picks a candidate's source
/// program. The original procedure used uniform 0.5 placeholders; observed
/// means are the default here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceScores {
    #[default]
    ObservedMeans,
    UniformPlaceholder,
}

/// Stochastic Introspective Mini-Batch Ascent.
///
/// Per step: draw a mini-batch, sample trajectories for `batch × model
/// variants` with softmax-selected source programs, group them into
/// per-example buckets, let the registered strategies turn the most
/// contrastive buckets into candidate programs, evaluate the candidates on
/// the batch, and fold them into the program pool. After the last step the
/// step winners are re-evaluated on a subsample of the trainset and the best
/// one is returned.
///
/// ```ignore
/// let optimizer = SIMBA::builder().bsize(8).max_steps(4).seed(7).build();
/// let optimized = optimizer.compile(student, None, &trainset, metric).await?;
/// ```
#[derive(Builder)]
pub struct SIMBA {
    /// Mini-batch size per step.
    #[builder(default = 32)]
    pub bsize: usize,
    /// Model variants per step, and the cap on candidates produced per step.
    #[builder(default = 6)]
    pub num_candidates: usize,
    #[builder(default = 8)]
    pub max_steps: usize,
    /// Demo-list cap enforced on every candidate.
    #[builder(default = 4)]
    pub max_demos: usize,
    #[builder(default = DEFAULT_DEMO_FIELD_BUDGET)]
    pub demo_input_field_maxlen: usize,
    /// Softmax temperature for per-trajectory source-program selection.
    #[builder(default = 0.2)]
    pub temperature_for_sampling: f32,
    /// Softmax temperature for per-bucket source-program selection.
    #[builder(default = 0.2)]
    pub temperature_for_candidates: f32,
    /// Bounded concurrency for trajectory sampling.
    #[builder(default = 20)]
    pub num_threads: usize,
    #[builder(default)]
    pub source_scores: SourceScores,
    /// Fixed RNG seed for deterministic replay; entropy-seeded when absent.
    pub seed: Option<u64>,
    pub correlation_id: Option<String>,
    /// Strategy override; defaults to `[AppendDemo]` configured from this
    /// optimizer's demo settings.
    pub strategies: Option<Vec<Arc<dyn Strategy>>>,
    /// Cooperative cancellation, checked between steps.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Telemetry handlers; see [`SimbaEvent`].
    #[builder(default)]
    pub handlers: Vec<EventHandler>,
}

struct LoopState {
    programs: Vec<Arc<dyn Program>>,
    program_scores: Vec<Vec<f32>>,
    /// Pool indices of step winners, latest first; seeded with the student.
    winners: Vec<usize>,
    data_indices: Vec<usize>,
    predictor_names: Vec<String>,
}

impl SIMBA {
    /// Optimizes `student` against `trainset` and returns the best program
    /// found (possibly the unchanged student). Synchronous in the async
    /// sense: resolves only once all steps and the final selection ran, or a
    /// validation error fired first.
    pub async fn compile(
        &self,
        student: Arc<dyn Program>,
        teacher: Option<Arc<dyn Program>>,
        trainset: &[Example],
        metric: Arc<dyn Metric>,
    ) -> Result<Arc<dyn Program>, CompileError> {
        self.validate(&student, teacher.as_deref(), trainset)?;

        let correlation_id = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let sink = EventSink::new(correlation_id, self.handlers.clone());
        let seed = self.seed.unwrap_or_else(entropy_seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let registry = self.registry();
        let started = Instant::now();

        let mut data_indices: Vec<usize> = (0..trainset.len()).collect();
        data_indices.shuffle(&mut rng);

        let mut state = LoopState {
            predictor_names: student.predictor_names(),
            programs: vec![student.clone()],
            program_scores: vec![Vec::new()],
            winners: vec![0],
            data_indices,
        };

        sink.emit(SimbaEvent::Start {
            trainset_size: trainset.len(),
            max_steps: self.max_steps,
            bsize: self.bsize,
            num_candidates: self.num_candidates,
        });

        let mut cancelled = false;
        for step in 0..self.max_steps {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }

            sink.emit(SimbaEvent::IterationStart { step });
            self.run_step(step, seed, &mut rng, &mut state, trainset, &metric, &registry, &sink)
                .await?;
            sink.emit(SimbaEvent::IterationStop { step });
        }

        let best = self
            .final_selection(&mut rng, &state, trainset, &metric)
            .await;

        sink.emit(SimbaEvent::Stop {
            duration: started.elapsed(),
            success: true,
            reason: cancelled.then_some(StopReason::Cancelled),
        });
        Ok(best)
    }

    fn validate(
        &self,
        student: &Arc<dyn Program>,
        teacher: Option<&dyn Program>,
        trainset: &[Example],
    ) -> Result<(), CompileError> {
        let signature_shape = |program: &dyn Program| -> Option<String> {
            let signature = program.signature();
            if signature.input_fields().is_empty() {
                Some("signature declares no input fields".to_string())
            } else if signature.output_fields().is_empty() {
                Some("signature declares no output fields".to_string())
            } else {
                None
            }
        };

        if let Some(reason) = signature_shape(student.as_ref()) {
            return Err(CompileError::InvalidStudentProgram { reason });
        }
        if let Some(teacher) = teacher {
            if let Some(reason) = signature_shape(teacher) {
                return Err(CompileError::InvalidTeacherProgram { reason });
            }
        }
        if trainset.is_empty() {
            return Err(CompileError::InvalidOrEmptyTrainset);
        }
        if self.bsize == 0 || self.num_candidates == 0 {
            return Err(CompileError::OptimizationFailed {
                detail: "bsize and num_candidates must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        step: usize,
        seed: u64,
        rng: &mut StdRng,
        state: &mut LoopState,
        trainset: &[Example],
        metric: &Arc<dyn Metric>,
        registry: &StrategyRegistry,
        sink: &EventSink,
    ) -> Result<(), CompileError> {
        // 1. Batch selection, wrapping modulo the shuffled index order.
        let start = step * self.bsize;
        let batch: Vec<Example> = (0..self.bsize)
            .map(|offset| {
                let index = state.data_indices[(start + offset) % state.data_indices.len()];
                trainset[index].clone()
            })
            .collect();

        // 2. Model variants around the base temperature.
        let temperatures = self.temperature_variants();

        // 3. Top programs by observed mean, student always included.
        let top_indices = self.top_program_indices(state);

        // 4. Trajectory sampling over batch × variants.
        let trajectories = self
            .sample_trajectories(rng, state, &batch, &temperatures, &top_indices, metric, sink)
            .await;
        sink.emit(SimbaEvent::TrajectorySampled {
            trajectory_count: trajectories.len(),
        });

        // 5. Bucket formation.
        let buckets = group_into_buckets(trajectories, self.num_candidates);
        sink.emit(SimbaEvent::BucketCreated {
            bucket_count: buckets.len(),
        });

        // 6. Candidate generation from the most contrastive viable buckets.
        let candidates = self.generate_candidates(step, seed, rng, state, &buckets, registry);
        sink.emit(SimbaEvent::StrategyApplied {
            candidates_created: candidates.len(),
        });

        // 7. Candidate evaluation on the same batch.
        let evaluator = Evaluator::builder()
            .max_concurrency(CANDIDATE_EVAL_CONCURRENCY)
            .timeout(STEP_TASK_TIMEOUT)
            .build();
        let mut candidate_means = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let evaluation = evaluator
                .evaluate(candidate.clone(), &batch, metric.clone())
                .await;
            candidate_means.push(evaluation.mean());
        }

        // 8. Winner update: best mean, ties to the earliest candidate.
        let mut best: Option<(usize, f32)> = None;
        for (index, &mean) in candidate_means.iter().enumerate() {
            if best.is_none_or(|(_, best_mean)| mean > best_mean) {
                best = Some((index, mean));
            }
        }

        // 9. Pool update.
        let pool_base = state.programs.len();
        for (candidate, mean) in candidates.into_iter().zip(candidate_means) {
            state.programs.push(candidate);
            state.program_scores.push(vec![mean]);
        }
        if let Some((winner_offset, _)) = best {
            state.winners.insert(0, pool_base + winner_offset);
        }

        if state.programs.len() != state.program_scores.len() {
            let detail = "program pool and score history diverged".to_string();
            sink.emit(SimbaEvent::Error {
                error_kind: "optimization_failed".to_string(),
                description: detail.clone(),
            });
            return Err(CompileError::OptimizationFailed { detail });
        }
        Ok(())
    }

    /// The first variant runs at the base temperature, the rest fan out over
    /// `0.5 + i · (0.5 / num_candidates)`, de-duplicated.
    fn temperature_variants(&self) -> Vec<f32> {
        let mut temperatures = vec![BASE_TEMPERATURE];
        for i in 1..self.num_candidates {
            let t = 0.5 + i as f32 * (0.5 / self.num_candidates as f32);
            if !temperatures.iter().any(|seen| seen.to_bits() == t.to_bits()) {
                temperatures.push(t);
            }
        }
        temperatures.truncate(self.num_candidates);
        temperatures
    }

    fn mean_score(scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.5;
        }
        scores.iter().sum::<f32>() / scores.len() as f32
    }

    fn top_program_indices(&self, state: &LoopState) -> Vec<usize> {
        let mut order: Vec<usize> = (0..state.programs.len()).collect();
        order.sort_by(|a, b| {
            Self::mean_score(&state.program_scores[*b])
                .partial_cmp(&Self::mean_score(&state.program_scores[*a]))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        order.truncate(self.num_candidates);

        if !order.contains(&0) {
            order.insert(0, 0);
            order.truncate(self.num_candidates.max(1));
        }
        order
    }

    #[allow(clippy::too_many_arguments)]
    async fn sample_trajectories(
        &self,
        rng: &mut StdRng,
        state: &LoopState,
        batch: &[Example],
        temperatures: &[f32],
        top_indices: &[usize],
        metric: &Arc<dyn Metric>,
        sink: &EventSink,
    ) -> Vec<Trajectory> {
        let top_means: Vec<f32> = top_indices
            .iter()
            .map(|&index| Self::mean_score(&state.program_scores[index]))
            .collect();

        // Program choices are drawn sequentially so workers never touch the
        // loop RNG.
        struct Job {
            exec_id: usize,
            example_index: usize,
            program_index: usize,
            example: Example,
            temperature: f32,
        }

        let mut jobs = Vec::with_capacity(batch.len() * temperatures.len());
        for (example_index, example) in batch.iter().enumerate() {
            for (variant_index, &temperature) in temperatures.iter().enumerate() {
                let choice = softmax_sample(rng, &top_means, self.temperature_for_sampling);
                jobs.push(Job {
                    exec_id: example_index * self.num_candidates + variant_index,
                    example_index,
                    program_index: top_indices[choice],
                    example: example.clone(),
                    temperature,
                });
            }
        }

        let correlation_id = sink.correlation_id().to_string();
        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let program = state.programs[job.program_index].clone();
                let metric = metric.clone();
                let correlation_id = correlation_id.clone();
                async move {
                    let model_config = LMConfig::builder().temperature(job.temperature).build();
                    let opts = ForwardOptions::builder()
                        .temperature(job.temperature)
                        .correlation_id(correlation_id)
                        .build();
                    let task_started = Instant::now();

                    let trajectory = match program.forward(job.example.inputs(), opts).await {
                        Ok(prediction) => {
                            let raw = metric.score(&job.example, &prediction).await;
                            let error = raw.as_ref().err().map(ToString::to_string);
                            let (score, success) = sanitize_score(raw);
                            Trajectory {
                                program_index: job.program_index,
                                example_index: job.example_index,
                                inputs: job.example.inputs(),
                                outputs: Some(prediction.data),
                                score,
                                success,
                                duration: task_started.elapsed(),
                                model_config,
                                exec_id: job.exec_id,
                                error,
                            }
                        }
                        Err(err) => Trajectory {
                            program_index: job.program_index,
                            example_index: job.example_index,
                            inputs: job.example.inputs(),
                            outputs: None,
                            score: 0.0,
                            success: false,
                            duration: task_started.elapsed(),
                            model_config,
                            exec_id: job.exec_id,
                            error: Some(err.to_string()),
                        },
                    };
                    Ok::<_, String>(trajectory)
                }
            })
            .collect();

        let outcomes = fan_out(tasks, self.num_threads.max(1), STEP_TASK_TIMEOUT).await;

        // Timed-out executions are discarded for this step, not retried.
        outcomes
            .into_iter()
            .filter_map(TaskOutcome::ok)
            .collect()
    }

    fn generate_candidates(
        &self,
        step: usize,
        seed: u64,
        rng: &mut StdRng,
        state: &LoopState,
        buckets: &[Bucket],
        registry: &StrategyRegistry,
    ) -> Vec<Arc<dyn Program>> {
        let source_scores: Vec<f32> = match self.source_scores {
            SourceScores::ObservedMeans => state
                .program_scores
                .iter()
                .map(|scores| Self::mean_score(scores))
                .collect(),
            SourceScores::UniformPlaceholder => vec![0.5; state.programs.len()],
        };

        let mut candidates = Vec::new();
        for bucket in buckets
            .iter()
            .filter(|bucket| bucket.is_viable(VIABLE_MIN_GAP, VIABLE_MIN_MAX_SCORE))
            .take(self.num_candidates)
        {
            let source_index =
                softmax_sample(rng, &source_scores, self.temperature_for_candidates);
            let source = &state.programs[source_index];

            // Seeded from the bucket's example index so the sub-RNG is stable
            // no matter which buckets survived the viability filter.
            let mut strategy_rng =
                StdRng::seed_from_u64(derive_seed(seed, step, bucket.example_index));
            let mut ctx = StrategyContext {
                rng: &mut strategy_rng,
                predictor_names: &state.predictor_names,
            };

            if let Some((candidate, strategy)) = registry.apply_first(bucket, source, &mut ctx) {
                tracing::debug!(
                    step,
                    strategy,
                    example_index = bucket.example_index,
                    source_index,
                    "candidate created"
                );
                candidates.push(candidate);
            }
        }
        candidates
    }

    /// Re-evaluates every winner on a uniform subsample of the trainset and
    /// returns the best by mean score, ties to the most recent step (winners
    /// are prepend-ordered). Falls back to the latest winner when every
    /// evaluation fails outright.
    async fn final_selection(
        &self,
        rng: &mut StdRng,
        state: &LoopState,
        trainset: &[Example],
        metric: &Arc<dyn Metric>,
    ) -> Arc<dyn Program> {
        let sample_size = trainset.len().min(FINAL_SUBSAMPLE);
        let subsample: Vec<Example> = rand::seq::index::sample(rng, trainset.len(), sample_size)
            .into_iter()
            .map(|index| trainset[index].clone())
            .collect();

        let evaluator = Evaluator::builder()
            .max_concurrency(FINAL_EVAL_CONCURRENCY)
            .timeout(FINAL_EVAL_TIMEOUT)
            .build();

        let mut best: Option<(usize, f32)> = None;
        for (position, &pool_index) in state.winners.iter().enumerate() {
            let evaluation = evaluator
                .evaluate(state.programs[pool_index].clone(), &subsample, metric.clone())
                .await;
            if evaluation.stats.successes == 0 {
                continue;
            }
            let mean = evaluation.mean();
            if best.is_none_or(|(_, best_mean)| mean > best_mean) {
                best = Some((position, mean));
            }
        }

        let position = best.map(|(position, _)| position).unwrap_or(0);
        state.programs[state.winners[position]].clone()
    }

    fn registry(&self) -> StrategyRegistry {
        match &self.strategies {
            Some(strategies) => StrategyRegistry::new(strategies.clone()),
            None => {
                let append_demo: Arc<dyn Strategy> = Arc::new(
                    AppendDemo::builder()
                        .max_demos(self.max_demos)
                        .demo_input_field_maxlen(self.demo_input_field_maxlen)
                        .build(),
                );
                StrategyRegistry::new(vec![append_demo])
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Seed material for non-replay runs: wall clock, process id, and a
/// process-unique counter.
fn entropy_seed() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos
        ^ u64::from(std::process::id()).rotate_left(32)
        ^ unique.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
