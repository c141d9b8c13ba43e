//! Graph-free reverse-mode differentiation
//!
//! No computation graph is built. Each operator instance keeps a LIFO
//! [`Trace`] of its outstanding forward calls and replays them in reverse
//! during backward, while per-tensor use-counts tell the optimizer when a
//! parameter has received every gradient contribution of the pass. This
//! lets the same operator be called many times before any backward call,
//! as in unrolled recurrent computation.

pub mod trace;
pub mod function;
pub mod adapters;

pub use trace::{Trace, TraceEntry};
pub use function::{
    BinaryTransform, NaryTransform, OperatorConfig, OperatorId, OperatorMeta, SplitTransform,
    UnaryTransform,
};
pub use adapters::{Binary, Nary, Operator, Split, Unary};

use crate::tensor::Tensor;

/// Mark the start of a pass on every tensor in `tensors`.
///
/// Needed only for tensors that still carry uses from an earlier, unfinished
/// pass (e.g. truncated backpropagation through time).
pub fn mark_pass_start<'a>(tensors: impl IntoIterator<Item = &'a Tensor>) {
    for tensor in tensors {
        tensor.mark_pass_start();
    }
}
