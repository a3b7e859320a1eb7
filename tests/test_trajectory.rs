use std::time::Duration;

use simba_rs::{Bucket, FieldValues, LMConfig, Trajectory, group_into_buckets};

const NUM_VARIANTS: usize = 4;

fn trajectory(example_index: usize, variant_index: usize, score: f32) -> Trajectory {
    Trajectory {
        program_index: 0,
        example_index,
        inputs: FieldValues::new(),
        outputs: Some(FieldValues::new()),
        score,
        success: true,
        duration: Duration::ZERO,
        model_config: LMConfig::default(),
        exec_id: example_index * NUM_VARIANTS + variant_index,
        error: None,
    }
}

fn example_scores(example_index: usize, scores: &[f32]) -> Vec<Trajectory> {
    scores
        .iter()
        .enumerate()
        .map(|(variant_index, &score)| trajectory(example_index, variant_index, score))
        .collect()
}

#[test]
fn test_trajectories_sorted_descending_within_bucket() {
    let bucket = Bucket::from_trajectories(0, example_scores(0, &[0.2, 0.9, 0.5, 0.7])).unwrap();

    let scores: Vec<f32> = bucket.trajectories().iter().map(|t| t.score).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.5, 0.2]);
    assert_eq!(bucket.best().score, 0.9);
    assert_eq!(bucket.worst().score, 0.2);
}

/// Twelve hand-picked trajectories across three examples, asserting the
/// global order by `(−max_to_min_gap, −max_score, −max_to_avg_gap)`.
#[test]
fn test_global_bucket_ordering() {
    let mut trajectories = Vec::new();
    // Example 0: gap 0.8, max 0.9, avg-gap 0.3.
    trajectories.extend(example_scores(0, &[0.9, 0.1, 0.7, 0.7]));
    // Example 1: flat scores, gap 0. Sorts last despite the high max.
    trajectories.extend(example_scores(1, &[0.9, 0.9, 0.9, 0.9]));
    // Example 2: gap 0.8, max 0.9, avg-gap 0.5. Beats example 0 on the
    // third key.
    trajectories.extend(example_scores(2, &[0.9, 0.1, 0.3, 0.3]));

    let buckets = group_into_buckets(trajectories, NUM_VARIANTS);

    assert_eq!(buckets.len(), 3);
    let order: Vec<usize> = buckets.iter().map(|b| b.example_index).collect();
    assert_eq!(order, vec![2, 0, 1]);

    // The lexicographic key is monotonically non-increasing down the order.
    for pair in buckets.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        assert!(
            first.max_to_min_gap > second.max_to_min_gap
                || (first.max_to_min_gap == second.max_to_min_gap
                    && (first.max_score > second.max_score
                        || (first.max_score == second.max_score
                            && first.max_to_avg_gap >= second.max_to_avg_gap)))
        );
    }
}

#[test]
fn test_bucket_statistics_are_derived_from_members() {
    let bucket = Bucket::from_trajectories(2, example_scores(2, &[0.9, 0.1, 0.3, 0.3])).unwrap();

    assert_eq!(bucket.max_score, 0.9);
    assert_eq!(bucket.min_score, 0.1);
    assert!((bucket.avg_score - 0.4).abs() < 1e-6);
    assert!((bucket.max_to_min_gap - 0.8).abs() < 1e-6);
    assert!((bucket.max_to_avg_gap - 0.5).abs() < 1e-6);
}

#[test]
fn test_viability_thresholds() {
    let contrastive = Bucket::from_trajectories(0, example_scores(0, &[0.9, 0.1, 0.7, 0.7])).unwrap();
    assert!(contrastive.is_viable(0.01, 0.1));

    let flat = Bucket::from_trajectories(1, example_scores(1, &[0.9, 0.9, 0.9, 0.9])).unwrap();
    assert!(!flat.is_viable(0.01, 0.1));

    let noise = Bucket::from_trajectories(2, example_scores(2, &[0.05, 0.0, 0.0, 0.0])).unwrap();
    assert!(!noise.is_viable(0.01, 0.1));
}

#[test]
fn test_grouping_ignores_stream_order() {
    // Interleave variants from different examples; grouping only follows
    // exec_id.
    let trajectories = vec![
        trajectory(1, 0, 0.9),
        trajectory(0, 0, 0.1),
        trajectory(1, 1, 0.2),
        trajectory(0, 1, 0.8),
    ];

    let buckets = group_into_buckets(trajectories, NUM_VARIANTS);
    assert_eq!(buckets.len(), 2);
    for bucket in &buckets {
        assert_eq!(bucket.len(), 2);
        assert!(
            bucket
                .trajectories()
                .iter()
                .all(|t| t.exec_id / NUM_VARIANTS == bucket.example_index)
        );
    }
}

#[test]
fn test_missing_variants_still_group() {
    // A timed-out variant was discarded; the bucket forms from what's left.
    let trajectories = vec![trajectory(0, 0, 0.4), trajectory(0, 2, 0.6)];

    let buckets = group_into_buckets(trajectories, NUM_VARIANTS);
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].len(), 2);
    assert_eq!(buckets[0].max_score, 0.6);
}
