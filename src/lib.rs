//! Prompt-program optimization via stochastic introspective mini-batch ascent.
//!
//! You declare what the LM should produce (a [`Signature`]), bind it to a
//! client as a [`Predict`] program, and let [`SIMBA`] tune the program's
//! few-shot demos (and optionally instructions) against a labeled trainset
//! and a scalar [`Metric`].
//!
//! # The mental model
//!
//! | Concept | Key types | Role |
//! |---------|-----------|------|
//! | **Contract** | [`Signature`], [`Example`] | "Given these inputs, produce these outputs" |
//! | **Execution** | [`Program`], [`Predict`], [`ChatAdapter`], [`LM`] | Render the contract into a prompt, call the client, parse the completion |
//! | **Optimization** | [`SIMBA`], [`Strategy`], [`Evaluator`] | Sample trajectories, bucket them per example, turn contrast into candidates |
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use simba_rs::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = Arc::new(LM::new(Arc::new(DummyProvider::fixed(
//!     "[[ ## answer ## ]]\n4",
//! ))));
//! let student: Arc<dyn Program> =
//!     Arc::new(Predict::new(Signature::parse("question -> answer")?, client));
//!
//! let trainset = vec![Example::new(
//!     FieldValues::from_iter([
//!         ("question".to_string(), "What is 2+2?".into()),
//!         ("answer".to_string(), "4".into()),
//!     ]),
//!     vec!["question".to_string()],
//! )];
//! let metric = metric_fn(|example, prediction| {
//!     Ok((example.get_str("answer") == prediction.get_str("answer")) as u8 as f32)
//! });
//!
//! let optimizer = SIMBA::builder().bsize(1).max_steps(2).build();
//! let optimized = optimizer.compile(student, None, &trainset, metric).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate organization
//!
//! - [`core`] — [`Signature`], the [`Program`] trait, error types, and the LM
//!   client stack (timeout, retries, circuit breaker)
//! - [`adapter`] — prompt formatting and completion parsing ([`ChatAdapter`])
//! - [`data`] — [`Example`], [`Demo`], [`Prediction`]
//! - [`predictors`] — [`Predict`] (the leaf program) and [`OptimizedProgram`]
//! - [`evaluate`] — bounded-concurrency [`Evaluator`] and the [`Metric`] trait
//! - [`optimizer`] — [`SIMBA`], trajectories, buckets, and strategies
//! - [`providers`] — [`DummyProvider`] for deterministic test runs
//! - [`utils`] — telemetry: `init_tracing`, [`SimbaEvent`], handler isolation

pub mod adapter;
pub mod core;
pub mod data;
pub mod evaluate;
pub mod optimizer;
pub mod predictors;
pub mod providers;
pub mod utils;

pub use crate::adapter::*;
pub use crate::core::*;
pub use crate::data::*;
pub use crate::evaluate::*;
pub use crate::optimizer::*;
pub use crate::predictors::*;
pub use crate::providers::*;
pub use crate::utils::*;
