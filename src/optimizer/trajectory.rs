use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::lm::LMConfig;
use crate::data::FieldValues;

/// Immutable record of one `(program, example, config)` execution.
///
/// `exec_id` encodes `(example_index_in_batch, model_variant_index)` as
/// `example_index · num_variants + variant_index`, so trajectories can be
/// regrouped per example regardless of completion order.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub program_index: usize,
    pub example_index: usize,
    pub inputs: FieldValues,
    pub outputs: Option<FieldValues>,
    pub score: f32,
    pub success: bool,
    pub duration: Duration,
    pub model_config: LMConfig,
    pub exec_id: usize,
    pub error: Option<String>,
}

/// All trajectories produced for a single example within a step, annotated
/// with score statistics. Trajectories are stored sorted by score descending.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub example_index: usize,
    trajectories: Vec<Trajectory>,
    pub max_score: f32,
    pub min_score: f32,
    pub avg_score: f32,
    pub max_to_min_gap: f32,
    pub max_to_avg_gap: f32,
}

impl Bucket {
    pub fn from_trajectories(example_index: usize, mut trajectories: Vec<Trajectory>) -> Option<Self> {
        if trajectories.is_empty() {
            return None;
        }

        trajectories.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let max_score = trajectories.first().map(|t| t.score).unwrap_or(0.0);
        let min_score = trajectories.last().map(|t| t.score).unwrap_or(0.0);
        let avg_score =
            trajectories.iter().map(|t| t.score).sum::<f32>() / trajectories.len() as f32;

        Some(Self {
            example_index,
            trajectories,
            max_score,
            min_score,
            avg_score,
            max_to_min_gap: max_score - min_score,
            max_to_avg_gap: max_score - avg_score,
        })
    }

    /// The highest-scoring trajectory.
    pub fn best(&self) -> &Trajectory {
        &self.trajectories[0]
    }

    pub fn worst(&self) -> &Trajectory {
        &self.trajectories[self.trajectories.len() - 1]
    }

    pub fn trajectories(&self) -> &[Trajectory] {
        &self.trajectories
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Worth optimizing: a real spread between best and worst, and a best
    /// that is not itself noise.
    pub fn is_viable(&self, min_gap: f32, min_max_score: f32) -> bool {
        self.max_to_min_gap > min_gap && self.max_score > min_max_score
    }

    /// Lexicographic key ordering buckets globally:
    /// `(−max_to_min_gap, −max_score, −max_to_avg_gap)`.
    pub fn cmp_priority(&self, other: &Self) -> Ordering {
        other
            .max_to_min_gap
            .partial_cmp(&self.max_to_min_gap)
            .unwrap_or(Ordering::Equal)
            .then(
                other
                    .max_score
                    .partial_cmp(&self.max_score)
                    .unwrap_or(Ordering::Equal),
            )
            .then(
                other
                    .max_to_avg_gap
                    .partial_cmp(&self.max_to_avg_gap)
                    .unwrap_or(Ordering::Equal),
            )
    }
}

/// Groups trajectories by `⌊exec_id / num_variants⌋` (the example index) and
/// returns the buckets in global priority order.
pub fn group_into_buckets(trajectories: Vec<Trajectory>, num_variants: usize) -> Vec<Bucket> {
    let num_variants = num_variants.max(1);

    let mut grouped: BTreeMap<usize, Vec<Trajectory>> = BTreeMap::new();
    for trajectory in trajectories {
        grouped
            .entry(trajectory.exec_id / num_variants)
            .or_default()
            .push(trajectory);
    }

    let mut buckets: Vec<Bucket> = grouped
        .into_iter()
        .filter_map(|(example_index, group)| Bucket::from_trajectories(example_index, group))
        .collect();
    buckets.sort_by(Bucket::cmp_priority);
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory(exec_id: usize, score: f32) -> Trajectory {
        Trajectory {
            program_index: 0,
            example_index: exec_id / 4,
            inputs: FieldValues::new(),
            outputs: Some(FieldValues::new()),
            score,
            success: true,
            duration: Duration::ZERO,
            model_config: LMConfig::default(),
            exec_id,
            error: None,
        }
    }

    #[test]
    fn bucket_statistics() {
        let bucket =
            Bucket::from_trajectories(0, vec![trajectory(0, 0.2), trajectory(1, 0.8)]).unwrap();

        assert_eq!(bucket.max_score, 0.8);
        assert_eq!(bucket.min_score, 0.2);
        assert!((bucket.avg_score - 0.5).abs() < 1e-6);
        assert!((bucket.max_to_min_gap - 0.6).abs() < 1e-6);
        assert!((bucket.max_to_avg_gap - 0.3).abs() < 1e-6);
        assert_eq!(bucket.best().score, 0.8);
    }

    #[test]
    fn empty_group_produces_no_bucket() {
        assert!(Bucket::from_trajectories(0, Vec::new()).is_none());
    }

    #[test]
    fn grouping_follows_exec_id() {
        let trajectories = vec![
            trajectory(0, 0.1),
            trajectory(1, 0.2),
            trajectory(4, 0.9),
            trajectory(5, 0.3),
        ];

        let buckets = group_into_buckets(trajectories, 4);
        assert_eq!(buckets.len(), 2);
        // Example 1 has the larger gap and sorts first.
        assert_eq!(buckets[0].example_index, 1);
        assert_eq!(buckets[1].example_index, 0);
    }
}
