use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;
use rand::rngs::StdRng;

/// Softmax-samples an index from `scores` at temperature `temperature`.
///
/// `p_i = exp(x_i / T) / Σ exp(x_j / T)`, drawn by inverse CDF. A temperature
/// of zero degenerates to argmax (ties to the earliest index), and so does a
/// weight sum that overflows. A weight sum that underflows to zero falls back
/// to a uniform draw.
pub fn softmax_sample(rng: &mut StdRng, scores: &[f32], temperature: f32) -> usize {
    if scores.len() <= 1 {
        return 0;
    }
    if temperature <= 0.0 {
        return argmax(scores);
    }

    let weights: Vec<f64> = scores
        .iter()
        .map(|&score| (f64::from(score) / f64::from(temperature)).exp())
        .collect();
    let total: f64 = weights.iter().sum();

    if !total.is_finite() {
        return argmax(scores);
    }
    if total <= 0.0 {
        return rng.gen_range(0..scores.len());
    }

    let draw = rng.r#gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if draw < cumulative {
            return index;
        }
    }
    scores.len() - 1
}

fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (index, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = index;
        }
    }
    best
}

/// Poisson draw via Knuth's product method. Adequate for the small rates used
/// for demo dropping (`λ = n / max_demos`).
pub fn poisson_sample(rng: &mut StdRng, lambda: f64) -> usize {
    if lambda <= 0.0 {
        return 0;
    }

    let limit = (-lambda).exp();
    let mut count = 0usize;
    let mut product = 1.0f64;
    loop {
        product *= rng.r#gen::<f64>();
        if product <= limit {
            return count;
        }
        count += 1;
    }
}

/// Deterministic seed for worker-side randomness, derived from the loop seed
/// and the unit of work so workers never touch the loop RNG.
pub fn derive_seed(loop_seed: u64, step: usize, unit: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    loop_seed.hash(&mut hasher);
    step.hash(&mut hasher);
    unit.hash(&mut hasher);
    hasher.finish()
}
