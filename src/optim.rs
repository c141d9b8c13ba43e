//! Parameter update loop
//!
//! The optimizer never inspects the operator structure. It updates a
//! tracked tensor only once [`Tensor::is_gradient_complete`] reports that
//! every consumer of the current pass has deposited its share, so a weight
//! reused at every timestep of an unrolled loop is still updated once.

use crate::{
    error::{GradError, GradResult},
    tensor::Tensor,
};

/// Update policy for one tensor; implementations keep per-tensor state
pub trait UpdateRule: Send {
    /// Move `data` against `grad`
    fn apply(&mut self, data: &mut [f32], grad: &[f32]);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);

    fn name(&self) -> &'static str;

    /// Forget accumulated moments
    fn reset(&mut self) {}
}

struct Tracked {
    tensor: Tensor,
    rule: Box<dyn UpdateRule>,
}

/// Insertion-ordered set of (tensor, rule) registrations
pub struct Optimizer {
    tracked: Vec<Tracked>,
    update_count: usize,
}

impl Optimizer {
    pub fn new() -> Self {
        Self {
            tracked: Vec::new(),
            update_count: 0,
        }
    }

    pub fn register(&mut self, tensor: Tensor, rule: Box<dyn UpdateRule>) -> GradResult<()> {
        if self.contains(&tensor) {
            return Err(GradError::InvalidInput(format!(
                "tensor {} is already registered",
                tensor.id()
            )));
        }
        tracing::debug!(tensor = %tensor.id(), rule = rule.name(), "registered parameter");
        self.tracked.push(Tracked { tensor, rule });
        Ok(())
    }

    /// Register every tensor with a fresh rule from `factory`
    pub fn register_all<I, F>(&mut self, tensors: I, mut factory: F) -> GradResult<()>
    where
        I: IntoIterator<Item = Tensor>,
        F: FnMut() -> Box<dyn UpdateRule>,
    {
        for tensor in tensors {
            self.register(tensor, factory())?;
        }
        Ok(())
    }

    pub fn contains(&self, tensor: &Tensor) -> bool {
        self.tracked.iter().any(|t| &t.tensor == tensor)
    }

    /// Update every tracked tensor whose gradient is complete and zero its
    /// gradient. Returns how many tensors were updated.
    pub fn update(&mut self) -> GradResult<usize> {
        let mut updated = 0;
        for Tracked { tensor, rule } in &mut self.tracked {
            if !tensor.is_gradient_complete() {
                continue;
            }
            let grad = tensor.grad().ok_or_else(|| {
                GradError::InvalidState(format!("tensor {} is complete without a gradient", tensor.id()))
            })?;
            rule.apply(&mut tensor.data_mut(), &grad);
            tensor.zero_grad();
            updated += 1;
        }

        if updated > 0 {
            self.update_count += 1;
            tracing::info!(
                round = self.update_count,
                updated,
                tracked = self.tracked.len(),
                "optimizer update"
            );
        }
        Ok(updated)
    }

    /// Drop every tracked gradient, forget every rule's moments and restart
    /// the round counter; weights are left as they are
    pub fn reset_params(&mut self) {
        for tracked in &mut self.tracked {
            tracked.tensor.clear_grad();
            tracked.rule.reset();
        }
        self.update_count = 0;
    }

    pub fn update_count(&self) -> usize {
        self.update_count
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn set_learning_rate(&mut self, lr: f32) {
        for tracked in &mut self.tracked {
            tracked.rule.set_learning_rate(lr);
        }
    }

    pub fn learning_rates(&self) -> Vec<f32> {
        self.tracked.iter().map(|t| t.rule.learning_rate()).collect()
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tracked.iter().map(|t| &t.tensor)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
