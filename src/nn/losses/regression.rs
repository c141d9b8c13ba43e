//! Regression loss functions

use crate::{error::GradResult, tensor::Tensor};
use super::{evaluate_items, Loss};

/// Mean of squared differences per batch item
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl Loss for MeanSquaredError {
    fn evaluate(&self, predictions: &[Tensor], targets: &[Tensor]) -> GradResult<f32> {
        evaluate_items(self.name(), predictions, targets, |p, t| {
            let len = p.len() as f32;
            let diff: Vec<f32> = p.iter().zip(t).map(|(p, t)| p - t).collect();
            let loss = diff.iter().map(|d| d * d).sum::<f32>() / len;
            let scale = 2.0 / len;
            (loss, diff.into_iter().map(|d| d * scale).collect())
        })
    }

    fn name(&self) -> &'static str {
        "mean_squared_error"
    }
}

/// Mean of absolute differences per batch item
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanAbsoluteError;

impl Loss for MeanAbsoluteError {
    fn evaluate(&self, predictions: &[Tensor], targets: &[Tensor]) -> GradResult<f32> {
        evaluate_items(self.name(), predictions, targets, |p, t| {
            let len = p.len() as f32;
            let mut loss = 0.0;
            let grad: Vec<f32> = p
                .iter()
                .zip(t)
                .map(|(p, t)| {
                    let d = p - t;
                    loss += d.abs();
                    if d == 0.0 {
                        0.0
                    } else {
                        d.signum() / len
                    }
                })
                .collect();
            (loss / len, grad)
        })
    }

    fn name(&self) -> &'static str {
        "mean_absolute_error"
    }
}

/// Quadratic within `delta` of the target, linear beyond it
#[derive(Debug, Clone, Copy)]
pub struct Huber {
    delta: f32,
}

impl Huber {
    pub fn new(delta: f32) -> Self {
        Self { delta }
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }
}

impl Default for Huber {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Loss for Huber {
    fn evaluate(&self, predictions: &[Tensor], targets: &[Tensor]) -> GradResult<f32> {
        let delta = self.delta;
        evaluate_items(self.name(), predictions, targets, |p, t| {
            let len = p.len() as f32;
            let mut loss = 0.0;
            let grad: Vec<f32> = p
                .iter()
                .zip(t)
                .map(|(p, t)| {
                    let d = p - t;
                    if d.abs() <= delta {
                        loss += 0.5 * d * d;
                        d / len
                    } else {
                        loss += delta * (d.abs() - 0.5 * delta);
                        delta * d.signum() / len
                    }
                })
                .collect();
            (loss / len, grad)
        })
    }

    fn name(&self) -> &'static str {
        "huber"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mse_literal_case() {
        let p = Tensor::from_vec(vec![1.0, 2.0], [2]).unwrap();
        let t = Tensor::from_vec(vec![0.0, 0.0], [2]).unwrap();
        let loss = MeanSquaredError.evaluate(&[p.clone()], &[t]).unwrap();
        assert!((loss - 2.5).abs() < 1e-6);
        assert_eq!(p.grad(), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_mse_equal_inputs_is_zero() {
        let p = Tensor::new([2, 2], 3, (0..12).map(|v| v as f32 * 0.5).collect()).unwrap();
        let t = p.deep_clone();
        let loss = MeanSquaredError.evaluate(&[p.clone()], &[t]).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(p.grad(), Some(vec![0.0; 12]));
    }

    #[test]
    fn test_seed_overwrites_previous_gradient() {
        let p = Tensor::from_vec(vec![1.0, 2.0], [2]).unwrap();
        p.set_grad(vec![10.0, 10.0]).unwrap();
        MeanSquaredError
            .evaluate(&[p.clone()], &[Tensor::zeros([2], 1)])
            .unwrap();
        assert_eq!(p.grad(), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_mae_and_huber() {
        let p = Tensor::from_vec(vec![3.0, -1.0], [2]).unwrap();
        let t = Tensor::zeros([2], 1);

        let mae = MeanAbsoluteError.evaluate(&[p.clone()], &[t.clone()]).unwrap();
        assert!((mae - 2.0).abs() < 1e-6);
        assert_eq!(p.grad(), Some(vec![0.5, -0.5]));

        // |3| is beyond delta = 1, |-1| is on the boundary
        let huber = Huber::new(1.0).evaluate(&[p.clone()], &[t]).unwrap();
        assert!((huber - (2.5 + 0.5) / 2.0).abs() < 1e-6);
        assert_eq!(p.grad(), Some(vec![0.5, -0.5]));
    }
}
