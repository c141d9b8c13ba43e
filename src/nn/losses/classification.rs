//! Classification loss functions

use crate::{error::GradResult, tensor::Tensor};
use super::{evaluate_items, Loss};

/// Softmax followed by negative log-likelihood of the true class.
///
/// The true class of a row is the index of the largest target value; on
/// ties the first maximum wins. Soft labels are therefore not supported:
/// only their argmax matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxCrossEntropy;

/// Index of the first maximum
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl Loss for SoftmaxCrossEntropy {
    fn evaluate(&self, predictions: &[Tensor], targets: &[Tensor]) -> GradResult<f32> {
        evaluate_items(self.name(), predictions, targets, |logits, target| {
            let class = argmax(target);
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let sum_exp: f32 = logits.iter().map(|l| (l - max).exp()).sum();
            let loss = -(logits[class] - max - sum_exp.ln());

            let mut grad = softmax(logits);
            grad[class] -= 1.0;
            (loss, grad)
        })
    }

    fn name(&self) -> &'static str {
        "softmax_cross_entropy"
    }
}
