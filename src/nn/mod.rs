//! Neural network components

pub mod layers;
pub mod losses;
pub mod optimizers;

pub use layers::StochasticDepth;
pub use losses::{Huber, Loss, LossFactory, MeanAbsoluteError, MeanSquaredError, SoftmaxCrossEntropy};
pub use optimizers::{AdaGrad, Adam, RmsProp, Sgd};
