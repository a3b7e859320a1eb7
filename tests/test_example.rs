use serde_json::json;

use simba_rs::{Demo, DemoMetadata, Example, FieldValues};

fn qa_example() -> Example {
    Example::new(
        FieldValues::from_iter([
            ("question".to_string(), json!("What is 2+2?")),
            ("hint".to_string(), json!("think in base 10")),
            ("answer".to_string(), json!("4")),
        ]),
        vec!["question".to_string(), "hint".to_string()],
    )
}

#[test]
fn test_label_keys_are_the_complement_of_input_keys() {
    let example = qa_example();

    assert_eq!(example.label_keys(), vec!["answer".to_string()]);
    assert_eq!(example.inputs().keys().collect::<Vec<_>>(), vec!["question", "hint"]);
    assert_eq!(example.labels().keys().collect::<Vec<_>>(), vec!["answer"]);
}

#[test]
fn test_accessors() {
    let example = qa_example();

    assert_eq!(example.get_str("answer"), Some("4"));
    assert_eq!(example.get("missing"), None);
    assert_eq!(example.keys().len(), 3);
}

#[test]
fn test_demo_truncates_only_string_fields() {
    let demo = Demo::with_budget(
        FieldValues::from_iter([
            ("question".to_string(), json!("a very long question indeed")),
            ("attempts".to_string(), json!(3)),
        ]),
        vec!["question".to_string()],
        6,
    );

    assert_eq!(demo.get_str("question"), Some("a very"));
    assert_eq!(demo.data.get("attempts"), Some(&json!(3)));
}

#[test]
fn test_demo_metadata_round_trip() {
    let demo = Demo::new(
        FieldValues::from_iter([
            ("question".to_string(), json!("q")),
            ("answer".to_string(), json!("a")),
        ]),
        vec!["question".to_string()],
    )
    .with_metadata(DemoMetadata {
        origin_score: 0.9,
        created_at: chrono::Utc::now(),
        strategy: "append_demo".to_string(),
    });

    let metadata = demo.metadata.as_ref().unwrap();
    assert_eq!(metadata.strategy, "append_demo");
    assert_eq!(metadata.origin_score, 0.9);

    assert_eq!(demo.inputs().keys().collect::<Vec<_>>(), vec!["question"]);
    assert_eq!(demo.outputs().keys().collect::<Vec<_>>(), vec!["answer"]);
}
