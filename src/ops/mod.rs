//! Operator library built on the arity adapters
//!
//! Each operator is a transform wrapped in [`Unary`](crate::autograd::Unary),
//! [`Binary`](crate::autograd::Binary), [`Nary`](crate::autograd::Nary) or
//! [`Split`](crate::autograd::Split). Activations, `Scale` and `Shift` can
//! also run their element-wise bodies on the accelerator.

pub mod activation;
pub mod combine;
pub mod dropout;
pub mod linear;

pub use activation::{Activation, ActivationKind, ActivationOp};
pub use combine::{concat_shape, Add, AddOp, Chunk, ChunkOp, Concat, ConcatOp, Mul, MulOp};
pub use dropout::{Dropout, DropoutOp};
pub use linear::{Linear, LinearOp, Scale, ScaleOp, Shift, ShiftOp};
