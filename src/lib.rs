//! stackgrad - graph-free reverse-mode automatic differentiation
//!
//! Features:
//! - Eager operators that remember each forward call on a per-instance trace
//! - Backward replay in exact reverse order, with no computation graph
//! - Per-tensor use-counts so a parameter reused across many calls (e.g. the
//!   weight of an unrolled recurrent cell) is updated exactly once per pass
//! - Loss evaluators that seed the backward pass
//! - Optional accelerated element-wise kernels on a blocking thread pool
//! - Stochastic depth with per-call skip decisions

pub mod error;
pub mod config;
pub mod tensor;
pub mod autograd;
pub mod accel;
pub mod ops;
pub mod nn;
pub mod optim;

pub use error::{GradError, GradResult};
pub use tensor::{Shape, Tensor, TensorId};
pub use autograd::{
    Binary, BinaryTransform, Nary, NaryTransform, Operator, OperatorConfig, OperatorMeta, Split,
    SplitTransform, Unary, UnaryTransform,
};
pub use accel::{Accelerate, Accelerator, Execution};
pub use optim::{Optimizer, UpdateRule};

/// Install a `tracing` subscriber at the configured log level.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init() -> GradResult<()> {
    let config = config::get_config();
    let level = config.logging.tracing_level()?;
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
    tracing::info!(
        version = version(),
        accelerated = accelerator_available(),
        "stackgrad initialized"
    );
    Ok(())
}

/// Set the seed that randomized operators constructed afterwards start from
pub fn set_seed(seed: u64) -> GradResult<()> {
    config::update_config(|c| c.training.seed = seed)
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Check if accelerated kernels can be bound
pub fn accelerator_available() -> bool {
    accel::is_available()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Loss, MeanSquaredError, Sgd};
    use crate::ops::{Activation, Add, Linear, Scale};

    #[test]
    fn test_init() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_set_seed_updates_config() {
        let seed = config::get_config().training.seed;
        set_seed(seed).unwrap();
        assert_eq!(config::get_config().training.seed, seed);
    }

    #[test]
    fn test_recurrent_weight_updated_once() {
        let mut cell = Scale::scale([2], Some(vec![0.5, -0.5])).unwrap();
        let mut add = Add::add();
        let mut act = Activation::tanh();
        let weight = cell.transform().weight().clone();

        let mut optimizer = Optimizer::new();
        optimizer.register(weight.clone(), Box::new(Sgd::new(0.1))).unwrap();

        let inputs: Vec<Tensor> = (1..=4).map(|t| Tensor::full([2], 1, t as f32 * 0.1)).collect();
        let mut h = Tensor::zeros([2], 1);
        let mut steps = Vec::new();
        for x in &inputs {
            let s = cell.forward(&h).unwrap();
            let z = add.forward(&s, x).unwrap();
            let next = act.forward(&z).unwrap();
            steps.push((s, z, next.clone()));
            h = next;
        }
        assert_eq!(weight.use_count(), 4);
        assert_eq!(cell.pending(), 4);

        let loss = MeanSquaredError
            .evaluate(&[h.clone()], &[Tensor::ones([2], 1)])
            .unwrap();
        assert!(loss > 0.0);

        let before = weight.to_vec();
        for (i, (s, z, out)) in steps.iter().enumerate().rev() {
            act.backward(out).unwrap();
            add.backward(z).unwrap();
            cell.backward(s).unwrap();
            if i > 0 {
                assert!(!weight.is_gradient_complete());
                assert_eq!(optimizer.update().unwrap(), 0);
                assert_eq!(weight.to_vec(), before);
            }
        }

        assert!(weight.is_gradient_complete());
        assert_eq!(optimizer.update().unwrap(), 1);
        assert_eq!(optimizer.update_count(), 1);
        assert_ne!(weight.to_vec(), before);
        assert_eq!(cell.pending(), 0);
        assert_eq!(add.pending(), 0);
        assert_eq!(act.pending(), 0);
        assert!(inputs.iter().all(|x| x.is_gradient_complete()));
    }

    #[test]
    fn test_training_loop_reduces_loss() {
        let mut layer = Linear::dense(2, 1).unwrap();
        let mut optimizer = Optimizer::new();
        optimizer
            .register_all(layer.parameters(), || Box::new(Sgd::new(0.05)))
            .unwrap();

        let x = Tensor::new([2], 2, vec![1.0, 2.0, -1.0, 0.5]).unwrap();
        let target = Tensor::new([1], 2, vec![1.0, -1.0]).unwrap();

        let mut losses = Vec::new();
        for _ in 0..25 {
            let y = layer.forward(&x).unwrap();
            losses.push(MeanSquaredError.evaluate(&[y.clone()], &[target.clone()]).unwrap());
            layer.backward(&y).unwrap();
            assert_eq!(optimizer.update().unwrap(), 2);
        }
        assert!(losses[24] < losses[0] * 0.5);
        assert_eq!(optimizer.update_count(), 25);
    }
}
