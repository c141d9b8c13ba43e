//! Loss evaluators
//!
//! A loss reduces a list of prediction tensors and matching targets to one
//! scalar and seeds the gradient of every prediction, which starts the
//! backward pass. Seeding overwrites whatever gradient the prediction held.
//! Per-item losses are averaged over the batch, then over the list.

pub mod classification;
pub mod regression;

pub use classification::SoftmaxCrossEntropy;
pub use regression::{Huber, MeanAbsoluteError, MeanSquaredError};

use crate::{
    error::{GradError, GradResult},
    tensor::Tensor,
};

/// Base trait for all loss functions
pub trait Loss: Send + Sync {
    /// Loss value; seeds `grad` on every prediction
    fn evaluate(&self, predictions: &[Tensor], targets: &[Tensor]) -> GradResult<f32>;

    fn name(&self) -> &'static str;
}

/// Shape checks that only run in debug builds
fn check_pairs(loss: &str, predictions: &[Tensor], targets: &[Tensor]) -> GradResult<()> {
    if !cfg!(debug_assertions) {
        return Ok(());
    }
    if predictions.len() != targets.len() {
        return Err(GradError::InvalidInput(format!(
            "{}: {} predictions but {} targets",
            loss,
            predictions.len(),
            targets.len()
        )));
    }
    for (p, t) in predictions.iter().zip(targets) {
        if p.len() != t.len() || p.batch_count() != t.batch_count() {
            return Err(GradError::shape_error(
                &format!("target of {} x {}", p.batch_count(), p.shape()),
                &format!("{} x {}", t.batch_count(), t.shape()),
                Some(&format!("{} compares predictions and targets element-wise", loss)),
            ));
        }
    }
    Ok(())
}

/// Apply `item` to every batch item of every pair, seed the gradients and
/// return the averaged loss.
///
/// `item` maps one prediction row and its target row to the row's loss and
/// its gradient.
pub(crate) fn evaluate_items<F>(
    loss: &str,
    predictions: &[Tensor],
    targets: &[Tensor],
    item: F,
) -> GradResult<f32>
where
    F: Fn(&[f32], &[f32]) -> (f32, Vec<f32>),
{
    check_pairs(loss, predictions, targets)?;
    if predictions.is_empty() {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for (prediction, target) in predictions.iter().zip(targets) {
        let width = prediction.item_len();
        let batch_count = prediction.batch_count().max(1);
        let (sum, grad) = {
            let p = prediction.data();
            let t = target.data();
            let mut grad = Vec::with_capacity(p.len());
            let mut sum = 0.0;
            for (p_row, t_row) in p.chunks(width.max(1)).zip(t.chunks(width.max(1))) {
                let (value, row_grad) = item(p_row, t_row);
                sum += value;
                grad.extend(row_grad);
            }
            (sum, grad)
        };
        prediction.set_grad(grad)?;
        total += sum / batch_count as f32;
    }

    let value = total / predictions.len() as f32;
    tracing::trace!(loss, value, "evaluated loss");
    Ok(value)
}

/// Build a loss by name
pub struct LossFactory;

impl LossFactory {
    pub fn create(name: &str) -> GradResult<Box<dyn Loss>> {
        match name.to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(Box::new(MeanSquaredError)),
            "mae" | "mean_absolute_error" => Ok(Box::new(MeanAbsoluteError)),
            "huber" => Ok(Box::new(Huber::default())),
            "cross_entropy" | "softmax_cross_entropy" => Ok(Box::new(SoftmaxCrossEntropy)),
            other => Err(GradError::InvalidInput(format!("Unknown loss function: {}", other))),
        }
    }
}
