//! Inverted dropout with a per-call mask kept in the trace

use rand::{rngs::StdRng, Rng, SeedableRng};
use crate::{
    autograd::{OperatorConfig, Unary, UnaryTransform},
    config,
    error::{GradError, GradResult},
    tensor::Tensor,
};

#[derive(Debug)]
pub struct DropoutOp {
    ratio: f32,
    training: bool,
    rng: StdRng,
}

impl DropoutOp {
    /// Seeded from the configured training seed
    pub fn new(ratio: f32) -> GradResult<Self> {
        Self::with_seed(ratio, config::get_config().training.seed)
    }

    pub fn with_seed(ratio: f32, seed: u64) -> GradResult<Self> {
        if !(0.0..1.0).contains(&ratio) {
            return Err(GradError::InvalidInput(format!(
                "Dropout ratio must lie in [0, 1), got {}",
                ratio
            )));
        }
        Ok(Self {
            ratio,
            training: true,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Keep-scale per element: 0 for dropped, `1 / (1 - ratio)` for kept
    fn draw_mask(&mut self, len: usize) -> Vec<f32> {
        let scale = 1.0 / (1.0 - self.ratio);
        let ratio = self.ratio;
        (0..len)
            .map(|_| if self.rng.gen::<f32>() < ratio { 0.0 } else { scale })
            .collect()
    }
}

fn pass_through(input: &Tensor) -> GradResult<Tensor> {
    Tensor::new(input.shape().clone(), input.batch_count(), input.to_vec())
}

impl UnaryTransform for DropoutOp {
    /// `None` when the call ran in evaluation mode
    type Saved = Option<Vec<f32>>;

    fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, Option<Vec<f32>>)> {
        if !self.training {
            return Ok((pass_through(input)?, None));
        }
        let mask = self.draw_mask(input.len());
        let data = input.data().iter().zip(&mask).map(|(x, m)| x * m).collect();
        let output = Tensor::new(input.shape().clone(), input.batch_count(), data)?;
        Ok((output, Some(mask)))
    }

    fn backward(&mut self, output_grad: &[f32], input: &Tensor, mask: Option<Vec<f32>>) -> GradResult<()> {
        match mask {
            Some(mask) => {
                let contribution: Vec<f32> = output_grad.iter().zip(&mask).map(|(g, m)| g * m).collect();
                input.accumulate_grad(&contribution)
            }
            None => input.accumulate_grad(output_grad),
        }
    }

    fn infer(&mut self, input: &Tensor) -> GradResult<Tensor> {
        pass_through(input)
    }
}

pub type Dropout = Unary<DropoutOp>;

impl Dropout {
    pub fn with_ratio(ratio: f32) -> GradResult<Self> {
        Ok(Unary::new(DropoutOp::new(ratio)?, OperatorConfig::new("dropout")))
    }

    pub fn seeded(ratio: f32, seed: u64) -> GradResult<Self> {
        Ok(Unary::new(DropoutOp::with_seed(ratio, seed)?, OperatorConfig::new("dropout")))
    }

    pub fn set_training(&mut self, training: bool) {
        self.transform_mut().set_training(training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ratio_is_identity() {
        let mut dropout = Dropout::seeded(0.0, 1).unwrap();
        let x = Tensor::new([3], 2, vec![0.1, -2.0, 3.5, 4.0, 5.25, -6.0]).unwrap();
        let y = dropout.forward(&x).unwrap();
        assert_eq!(y.to_vec(), x.to_vec());
    }

    #[test]
    fn test_ratio_out_of_range_is_rejected() {
        assert!(matches!(DropoutOp::with_seed(1.0, 0), Err(GradError::InvalidInput(_))));
        assert!(DropoutOp::with_seed(1.5, 0).is_err());
        assert!(DropoutOp::with_seed(-0.1, 0).is_err());
        assert!(DropoutOp::with_seed(0.99, 0).is_ok());
    }

    #[test]
    fn test_masks_pair_with_their_backward_call() {
        let mut dropout = Dropout::seeded(0.5, 7).unwrap();
        let x1 = Tensor::ones([64], 1);
        let x2 = Tensor::ones([64], 1);
        let y1 = dropout.forward(&x1).unwrap();
        let y2 = dropout.forward(&x2).unwrap();

        y2.set_grad(vec![1.0; 64]).unwrap();
        y1.set_grad(vec![1.0; 64]).unwrap();
        dropout.backward(&y2).unwrap();
        dropout.backward(&y1).unwrap();

        // gradient through a kept element equals its output value, dropped ones stay zero
        assert_eq!(x1.grad().unwrap(), y1.to_vec());
        assert_eq!(x2.grad().unwrap(), y2.to_vec());
        assert!(y1.to_vec().iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn test_same_seed_same_mask() {
        let x = Tensor::ones([32], 1);
        let a = Dropout::seeded(0.3, 11).unwrap().forward(&x).unwrap();
        let b = Dropout::seeded(0.3, 11).unwrap().forward(&x).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
    }

    #[test]
    fn test_eval_mode_passes_through() {
        let mut dropout = Dropout::seeded(0.9, 3).unwrap();
        dropout.set_training(false);
        let x = Tensor::ones([8], 1);
        let y = dropout.forward(&x).unwrap();
        assert_eq!(y.to_vec(), vec![1.0; 8]);

        y.set_grad(vec![2.0; 8]).unwrap();
        dropout.backward(&y).unwrap();
        assert_eq!(x.grad(), Some(vec![2.0; 8]));
        assert_eq!(dropout.predict(&x).unwrap().to_vec(), vec![1.0; 8]);
    }
}
