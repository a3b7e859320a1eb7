use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use simba_rs::{
    Bucket, Chat, CompileError, DummyProvider, Evaluator, Example, FieldValues, LM, LMClient,
    LMConfig, LMResponse, LmError, Metric, MetricError, Predict, Program, Signature, SimbaEvent,
    SkipReason, SourceScores, StopReason, Strategy, StrategyContext, StrategyOutcome, SIMBA,
    metric_fn,
};

fn qa(question: &str, answer: &str) -> Example {
    Example::new(
        FieldValues::from_iter([
            ("question".to_string(), json!(question)),
            ("answer".to_string(), json!(answer)),
        ]),
        vec!["question".to_string()],
    )
}

fn exact_match() -> Arc<dyn Metric> {
    metric_fn(|example, prediction| {
        Ok((example.get_str("answer") == prediction.get_str("answer")) as u8 as f32)
    })
}

fn question_in(chat: &Chat) -> String {
    chat.messages
        .last()
        .map(|message| message.content())
        .and_then(|content| content.split("[[ ## question ## ]]\n").nth(1))
        .and_then(|tail| tail.split("\n\n").next())
        .unwrap_or("")
        .to_string()
}

fn math_answer(question: &str) -> &'static str {
    match question {
        "What is 2+2?" => "4",
        "What is 3+3?" => "6",
        "What is 4+4?" => "8",
        "What is 5+5?" => "10",
        _ => "?",
    }
}

/// Answers correctly only when the prompt carries a demo whose answer starts
/// with a digit, or when the request runs at an exploration temperature below
/// the base one.
fn math_stub() -> DummyProvider {
    DummyProvider::from_fn(|chat, config| {
        let has_digit_demo = chat.messages.iter().any(|message| {
            message.role() == "assistant"
                && message
                    .content()
                    .split("[[ ## answer ## ]]\n")
                    .nth(1)
                    .and_then(|tail| tail.trim_start().chars().next())
                    .is_some_and(|c| c.is_ascii_digit())
        });
        let exploring = config.temperature < 0.69;

        let completion = if has_digit_demo || exploring {
            format!("[[ ## answer ## ]]\n{}", math_answer(&question_in(chat)))
        } else {
            "[[ ## answer ## ]]\nI don't know".to_string()
        };
        Ok(LMResponse {
            completion,
            ..LMResponse::default()
        })
    })
}

fn student_with(provider: DummyProvider) -> Arc<dyn Program> {
    let lm = Arc::new(LM::new(Arc::new(provider)));
    Arc::new(Predict::new(Signature::parse("question -> answer").unwrap(), lm))
}

fn math_trainset() -> Vec<Example> {
    vec![
        qa("What is 2+2?", "4"),
        qa("What is 3+3?", "6"),
        qa("What is 4+4?", "8"),
        qa("What is 5+5?", "10"),
    ]
}

fn event_recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn Fn(&SimbaEvent) + Send + Sync>) {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    let handler: Arc<dyn Fn(&SimbaEvent) + Send + Sync> = Arc::new(move |event| {
        log_clone.lock().unwrap().push(event.name().to_string());
    });
    (log, handler)
}

struct AlwaysSkip;

impl Strategy for AlwaysSkip {
    fn name(&self) -> &'static str {
        "always_skip"
    }

    fn is_applicable(&self, _bucket: &Bucket) -> bool {
        true
    }

    fn apply(
        &self,
        _bucket: &Bucket,
        _source: &Arc<dyn Program>,
        _ctx: &mut StrategyContext<'_>,
    ) -> StrategyOutcome {
        StrategyOutcome::Skip(SkipReason::BelowQualityThreshold)
    }
}

// --- scenario: single-step identity ---

#[tokio::test]
async fn test_single_step_identity() {
    let student = student_with(DummyProvider::fixed("[[ ## answer ## ]]\n4"));
    let trainset = vec![qa("What is 2+2?", "4")];

    let optimizer = SIMBA::builder()
        .bsize(1)
        .num_candidates(1)
        .max_steps(1)
        .seed(1)
        .build();
    let optimized = optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    assert!(optimized.demos().len() <= 1);

    let evaluation = Evaluator::default()
        .evaluate(optimized, &trainset, exact_match())
        .await;
    assert_eq!(evaluation.mean(), 1.0);
}

// --- scenario: demo appended lifts score ---

#[tokio::test]
async fn test_demo_appended_lifts_score() {
    let student = student_with(math_stub());
    let trainset = math_trainset();

    let student_mean = Evaluator::default()
        .evaluate(student.clone(), &trainset, exact_match())
        .await
        .mean();
    assert_eq!(student_mean, 0.0);

    let optimizer = SIMBA::builder()
        .bsize(4)
        .num_candidates(3)
        .max_steps(2)
        .seed(42)
        .build();
    let optimized = optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    assert!(!optimized.demos().is_empty());

    let optimized_mean = Evaluator::default()
        .evaluate(optimized, &trainset, exact_match())
        .await
        .mean();
    assert!(optimized_mean > student_mean);
    assert!(optimized_mean >= 0.5, "got {optimized_mean}");
}

// --- scenario: metric exceptions do not abort ---

#[tokio::test]
async fn test_metric_errors_do_not_abort_the_step() {
    let student = student_with(DummyProvider::fixed("[[ ## answer ## ]]\nok"));
    let trainset: Vec<Example> = (0..6).map(|i| qa(&format!("q{i}"), "ok")).collect();

    let metric = metric_fn(|example, _| {
        let question = example.get_str("question").unwrap_or_default();
        let index: usize = question[1..].parse().unwrap_or(0);
        if index % 2 == 1 {
            Err(MetricError::Failed {
                message: "synthetic metric crash".to_string(),
            })
        } else {
            Ok(0.7)
        }
    });

    let (log, handler) = event_recorder();
    let optimizer = SIMBA::builder()
        .bsize(6)
        .num_candidates(2)
        .max_steps(1)
        .seed(7)
        .handlers(vec![handler])
        .build();

    let result = optimizer.compile(student, None, &trainset, metric).await;
    assert!(result.is_ok());

    let events = log.lock().unwrap().clone();
    let stops = events.iter().filter(|e| *e == "optimizer.iteration.stop").count();
    assert_eq!(stops, 1);
}

// --- scenario: cancellation between steps ---

#[tokio::test]
async fn test_cancellation_between_steps() {
    let student = student_with(math_stub());
    let trainset = math_trainset();

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_setter = cancel.clone();
    let events: Arc<Mutex<Vec<SimbaEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();

    let handler: Arc<dyn Fn(&SimbaEvent) + Send + Sync> = Arc::new(move |event| {
        if let SimbaEvent::IterationStop { step: 2 } = event {
            cancel_setter.store(true, Ordering::Relaxed);
        }
        events_clone.lock().unwrap().push(event.clone());
    });

    let optimizer = SIMBA::builder()
        .bsize(2)
        .num_candidates(2)
        .max_steps(5)
        .seed(3)
        .cancel(cancel)
        .handlers(vec![handler])
        .build();

    let result = optimizer
        .compile(student, None, &trainset, exact_match())
        .await;
    assert!(result.is_ok());

    let events = events.lock().unwrap();
    let steps_started = events
        .iter()
        .filter(|e| matches!(e, SimbaEvent::IterationStart { .. }))
        .count();
    assert_eq!(steps_started, 3, "steps 0, 1, 2 and nothing further");

    let stop_reason = events.iter().find_map(|e| match e {
        SimbaEvent::Stop { reason, success, .. } => Some((*reason, *success)),
        _ => None,
    });
    assert_eq!(stop_reason, Some((Some(StopReason::Cancelled), true)));
}

// --- boundary behaviors ---

#[tokio::test]
async fn test_empty_trainset_is_rejected() {
    let student = student_with(DummyProvider::fixed("[[ ## answer ## ]]\n4"));
    let optimizer = SIMBA::builder().build();

    let err = optimizer
        .compile(student, None, &[], exact_match())
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidOrEmptyTrainset));
}

#[tokio::test]
async fn test_zero_steps_returns_student_unchanged() {
    let student = student_with(DummyProvider::fixed("[[ ## answer ## ]]\n4"));
    let trainset = vec![qa("What is 2+2?", "4")];

    let (log, handler) = event_recorder();
    let optimizer = SIMBA::builder()
        .max_steps(0)
        .seed(5)
        .handlers(vec![handler])
        .build();
    let optimized = optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    assert!(optimized.demos().is_empty());
    let events = log.lock().unwrap().clone();
    assert!(!events.iter().any(|e| e == "optimizer.iteration.start"));
    assert!(events.contains(&"optimizer.start".to_string()));
    assert!(events.contains(&"optimizer.stop".to_string()));
}

#[tokio::test]
async fn test_single_candidate_still_progresses() {
    let student = student_with(math_stub());
    let trainset = math_trainset();

    let optimizer = SIMBA::builder()
        .bsize(2)
        .num_candidates(1)
        .max_steps(2)
        .seed(9)
        .build();
    let result = optimizer
        .compile(student, None, &trainset, exact_match())
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_always_skipping_strategy_returns_student() {
    let student = student_with(math_stub());
    let trainset = math_trainset();

    let optimizer = SIMBA::builder()
        .bsize(4)
        .num_candidates(3)
        .max_steps(2)
        .seed(11)
        .strategies(vec![Arc::new(AlwaysSkip) as Arc<dyn Strategy>])
        .build();
    let optimized = optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    assert!(optimized.demos().is_empty());
}

#[tokio::test]
async fn test_always_timing_out_client_returns_student() {
    struct NeverAnswers;

    #[async_trait]
    impl LMClient for NeverAnswers {
        async fn request(&self, _chat: &Chat, _config: &LMConfig) -> Result<LMResponse, LmError> {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(LMResponse::default())
        }
    }

    // Client-level timeout fires fast, so every trajectory scores zero.
    let lm = Arc::new(
        LM::builder()
            .transport(Arc::new(NeverAnswers))
            .default_config(LMConfig::builder().timeout(Duration::from_millis(10)).build())
            .build(),
    );
    let student: Arc<dyn Program> =
        Arc::new(Predict::new(Signature::parse("question -> answer").unwrap(), lm));
    let trainset = math_trainset();

    let optimizer = SIMBA::builder()
        .bsize(2)
        .num_candidates(2)
        .max_steps(1)
        .seed(13)
        .build();
    let optimized = optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    assert!(optimized.demos().is_empty());
}

#[tokio::test]
async fn test_invalid_student_signature_is_rejected() {
    // A signature with no output fields cannot be built through the
    // shorthand, so assemble one directly.
    let signature = Signature::new(
        "broken",
        "",
        indexmap::IndexMap::from([("question".to_string(), simba_rs::FieldSpec::default())]),
        indexmap::IndexMap::new(),
    )
    .unwrap();
    let lm = Arc::new(LM::new(Arc::new(DummyProvider::fixed("x"))));
    let student: Arc<dyn Program> = Arc::new(Predict::new(signature, lm));

    let optimizer = SIMBA::builder().build();
    let err = optimizer
        .compile(student, None, &[qa("q", "a")], exact_match())
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidStudentProgram { .. }));
}

// --- determinism and pool behavior ---

#[tokio::test]
async fn test_deterministic_replay_with_fixed_seed() {
    async fn run() -> (Vec<FieldValues>, f32) {
        let student = student_with(math_stub());
        let trainset = math_trainset();
        let optimizer = SIMBA::builder()
            .bsize(4)
            .num_candidates(3)
            .max_steps(2)
            .seed(1234)
            .build();
        let optimized = optimizer
            .compile(student, None, &trainset, exact_match())
            .await
            .unwrap();

        let demo_data: Vec<FieldValues> =
            optimized.demos().iter().map(|demo| demo.data.clone()).collect();
        let mean = Evaluator::default()
            .evaluate(optimized, &trainset, exact_match())
            .await
            .mean();
        (demo_data, mean)
    }

    let (demos_a, mean_a) = run().await;
    let (demos_b, mean_b) = run().await;

    assert_eq!(demos_a, demos_b);
    assert_eq!(mean_a, mean_b);
}

#[tokio::test]
async fn test_uniform_placeholder_source_scores_still_work() {
    let student = student_with(math_stub());
    let trainset = math_trainset();

    let optimizer = SIMBA::builder()
        .bsize(4)
        .num_candidates(3)
        .max_steps(2)
        .seed(21)
        .source_scores(SourceScores::UniformPlaceholder)
        .build();
    let optimized = optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    assert!(!optimized.demos().is_empty());
}

#[tokio::test]
async fn test_event_sequence_for_one_step() {
    let student = student_with(DummyProvider::fixed("[[ ## answer ## ]]\n4"));
    let trainset = vec![qa("What is 2+2?", "4")];

    let (log, handler) = event_recorder();
    let optimizer = SIMBA::builder()
        .bsize(1)
        .num_candidates(1)
        .max_steps(1)
        .seed(17)
        .correlation_id("run-123".to_string())
        .handlers(vec![handler])
        .build();
    optimizer
        .compile(student, None, &trainset, exact_match())
        .await
        .unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "optimizer.start",
            "optimizer.iteration.start",
            "optimizer.trajectory.sampled",
            "optimizer.bucket.created",
            "optimizer.strategy.applied",
            "optimizer.iteration.stop",
            "optimizer.stop",
        ]
    );
}

#[tokio::test]
async fn test_panicking_telemetry_handler_does_not_break_compile() {
    let student = student_with(DummyProvider::fixed("[[ ## answer ## ]]\n4"));
    let trainset = vec![qa("What is 2+2?", "4")];

    let panicking: Arc<dyn Fn(&SimbaEvent) + Send + Sync> =
        Arc::new(|_| panic!("handler crash"));
    let optimizer = SIMBA::builder()
        .bsize(1)
        .num_candidates(1)
        .max_steps(1)
        .seed(19)
        .handlers(vec![panicking])
        .build();

    let result = optimizer
        .compile(student, None, &trainset, exact_match())
        .await;
    assert!(result.is_ok());
}
