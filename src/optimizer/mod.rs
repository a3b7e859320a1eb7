//! The SIMBA optimization loop and its supporting model.
//!
//! [`SIMBA::compile`] takes a student [`Program`](crate::core::Program), a
//! labeled trainset, and a [`Metric`](crate::evaluate::Metric), and returns a
//! program whose attached demos (and, with [`AppendRule`], instructions)
//! score higher than the student's. The search is guided stochastic ascent:
//! per-step mini-batches, temperature-varied trajectory sampling, bucket
//! statistics over per-example contrast, and strategy-generated candidates
//! folded into a softmax-weighted program pool.

pub mod sampling;
pub mod simba;
pub mod strategy;
pub mod trajectory;

pub use sampling::*;
pub use simba::*;
pub use strategy::*;
pub use trajectory::*;
