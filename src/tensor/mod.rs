//! Batched tensors with gradient accumulators and consumer counts
//!
//! A [`Tensor`] is a shared handle:
//! - flat `f32` data for `batch_count` samples of a per-sample [`Shape`]
//! - a lazily allocated gradient that backward contributions add into
//! - a use-count of forward consumers still waiting for their backward call
//! - a weak back-reference to the operator that produced it

pub mod core;
pub mod storage;
pub mod ops;

pub use self::core::{Shape, Tensor, TensorId};
pub use storage::TensorStorage;
