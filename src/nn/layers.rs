//! Composite layers

use std::sync::Arc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use crate::{
    autograd::{Operator, OperatorConfig, OperatorMeta, Trace, TraceEntry},
    config,
    error::{ErrorContext, GradError, GradResult, WithContext},
    tensor::{
        ops::{concat_samples, scaled, split_samples},
        Shape, Tensor,
    },
};

/// Everything one forward call of [`StochasticDepth`] leaves for its backward
#[derive(Debug)]
struct DepthRecord {
    skipped: bool,
    /// Factor applied to the branch output; 1 outside training
    scale: f32,
    residual_out: Tensor,
    /// Output of the wrapped operator, or the zero placeholder when skipped
    branch_out: Tensor,
}

/// Stochastic depth: randomly drops a wrapped operator for a whole call.
///
/// Each call runs the residual path (the optional `residual` operator, or
/// the input itself) and, unless the coin says skip, the wrapped operator.
/// The result is the per-sample concatenation `[residual, branch]`. Kept
/// branch outputs are scaled by `1 / (1 - pl)` during training; a skipped
/// branch contributes zeros and receives no backward call.
pub struct StochasticDepth {
    meta: Arc<OperatorMeta>,
    trace: Trace<DepthRecord>,
    verbose: bool,
    residual: Option<Box<dyn Operator>>,
    inner: Box<dyn Operator>,
    pl: f32,
    training: bool,
    rng: StdRng,
}

impl StochasticDepth {
    /// `pl` is the probability of skipping `inner` and must lie in `[0, 1)`
    pub fn new(
        inner: Box<dyn Operator>,
        residual: Option<Box<dyn Operator>>,
        pl: f32,
        config: OperatorConfig,
    ) -> GradResult<Self> {
        if !(0.0..1.0).contains(&pl) {
            return Err(GradError::InvalidInput(format!(
                "Skip probability must lie in [0, 1), got {}",
                pl
            )));
        }
        let (meta, bound, verbose) = config.into_meta();
        let trace = Trace::new(meta.name(), bound);
        Ok(Self {
            meta: Arc::new(meta),
            trace,
            verbose,
            residual,
            inner,
            pl,
            training: true,
            rng: StdRng::seed_from_u64(config::get_config().training.seed),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn skip_probability(&self) -> f32 {
        self.pl
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Outside training the wrapped operator always runs, unscaled
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn residual_width(&self, input: &Shape) -> usize {
        match &self.residual {
            Some(op) => op.output_shape(input).total_elements(),
            None => input.total_elements(),
        }
    }

    /// Undo the residual half of a forward call that did not complete
    fn release_residual(&mut self, input: &Tensor) {
        let _ = match self.residual.as_mut() {
            Some(op) => op.rollback(),
            None => input.record_consumed(),
        };
    }

    fn join(residual: &Tensor, branch: &[f32], branch_width: usize) -> GradResult<Tensor> {
        let residual_width = residual.item_len();
        let batch_count = residual.batch_count();
        let data = concat_samples(
            &[(&residual.data()[..], residual_width), (branch, branch_width)],
            batch_count,
        );
        Tensor::new([residual_width + branch_width], batch_count, data)
    }
}

impl Operator for StochasticDepth {
    fn meta(&self) -> &Arc<OperatorMeta> {
        &self.meta
    }

    fn forward(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.trace.check_capacity()?;

        let residual_out = match self.residual.as_mut() {
            Some(op) => op.forward(input)?,
            None => {
                input.record_use()?;
                input.clone()
            }
        };

        let skipped = self.training && self.rng.gen::<f32>() < self.pl;
        let scale = if self.training { 1.0 / (1.0 - self.pl) } else { 1.0 };
        let branch = if skipped {
            let shape = self.inner.output_shape(input.shape());
            let placeholder = Tensor::zeros(shape, input.batch_count());
            let values = placeholder.to_vec();
            Ok((placeholder, values))
        } else {
            self.inner.forward(input).map(|out| {
                let values = scaled(&out.data(), scale);
                (out, values)
            })
        };
        let (branch_out, branch_values) = match branch {
            Ok(branch) => branch,
            Err(e) => {
                self.release_residual(input);
                return Err(e);
            }
        };

        let output = match Self::join(&residual_out, &branch_values, branch_out.item_len()) {
            Ok(output) => output,
            Err(e) => {
                if !skipped {
                    let _ = self.inner.rollback();
                }
                self.release_residual(input);
                return Err(e);
            }
        };
        output.set_producer(&self.meta);
        self.trace.push(TraceEntry::new(
            vec![input.clone()],
            DepthRecord {
                skipped,
                scale,
                residual_out,
                branch_out,
            },
        ))?;
        self.meta.record_forward();

        if self.verbose {
            tracing::debug!(operator = self.meta.name(), skipped, pending = self.trace.len(), "forward");
        }
        Ok(output)
    }

    fn backward(&mut self, output: &Tensor) -> GradResult<()> {
        let TraceEntry { inputs, aux: record } = self.trace.pop()?;
        if cfg!(debug_assertions) && inputs.len() != 1 {
            return Err(GradError::arity(self.meta.name(), 1, inputs.len()));
        }
        let input = &inputs[0];

        let widths = [record.residual_out.item_len(), record.branch_out.item_len()];
        let parts = split_samples(&output.grad_or_zeros(), &widths, input.batch_count())?;

        record.residual_out.accumulate_grad(&parts[0])?;
        match self.residual.as_mut() {
            Some(op) => op.backward(&record.residual_out)?,
            None => input.record_consumed()?,
        }

        if !record.skipped {
            record.branch_out.accumulate_grad(&scaled(&parts[1], record.scale))?;
            let inner_name = self.inner.name().to_string();
            self.inner.backward(&record.branch_out).with_context(|| {
                ErrorContext::new(self.meta.name())
                    .with_pending(self.trace.len())
                    .with_suggestion(&format!("check the replay order of '{}'", inner_name))
            })?;
        }
        self.meta.record_backward();

        if self.verbose {
            tracing::debug!(
                operator = self.meta.name(),
                skipped = record.skipped,
                pending = self.trace.len(),
                "backward"
            );
        }
        Ok(())
    }

    fn rollback(&mut self) -> GradResult<()> {
        let TraceEntry { inputs, aux: record } = self.trace.pop()?;
        if !record.skipped {
            self.inner.rollback()?;
        }
        match self.residual.as_mut() {
            Some(op) => op.rollback(),
            None => inputs.iter().try_for_each(Tensor::record_consumed),
        }
    }

    fn predict(&mut self, input: &Tensor) -> GradResult<Tensor> {
        let residual_out = match self.residual.as_mut() {
            Some(op) => op.predict(input)?,
            None => input.clone(),
        };
        let branch = self.inner.predict(input)?;
        let values = branch.to_vec();
        Self::join(&residual_out, &values, branch.item_len())
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = self
            .residual
            .as_ref()
            .map(|op| op.parameters())
            .unwrap_or_default();
        params.extend(self.inner.parameters());
        params
    }

    fn pending(&self) -> usize {
        self.trace.len()
    }

    fn output_shape(&self, input: &Shape) -> Shape {
        let branch = self.inner.output_shape(input).total_elements();
        Shape::from([self.residual_width(input) + branch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Scale;

    fn doubling() -> Box<dyn Operator> {
        Box::new(Scale::scale([2], Some(vec![2.0, 2.0])).unwrap())
    }

    #[test]
    fn test_certain_skip_is_rejected() {
        let config = OperatorConfig::new("depth");
        assert!(StochasticDepth::new(doubling(), None, 1.0, config.clone()).is_err());
        assert!(StochasticDepth::new(doubling(), None, -0.5, config.clone()).is_err());
        assert!(StochasticDepth::new(doubling(), None, 0.0, config).is_ok());
    }

    #[test]
    fn test_decisions_pair_with_their_backward_calls() {
        let inner = doubling();
        let inner_meta = Arc::clone(inner.meta());
        let mut depth = StochasticDepth::new(inner, None, 0.5, OperatorConfig::new("depth"))
            .unwrap()
            .with_seed(5);

        let inputs: Vec<Tensor> = (0..16).map(|_| Tensor::ones([2], 1)).collect();
        let mut outputs = Vec::new();
        let mut kept = Vec::new();
        for x in &inputs {
            let y = depth.forward(x).unwrap();
            let values = y.to_vec();
            assert_eq!(&values[..2], &[1.0, 1.0]);
            // kept branch: 2 * x scaled by 1 / (1 - 0.5)
            kept.push(values[2] == 4.0);
            assert!(values[2] == 4.0 || values[2] == 0.0);
            y.set_grad(vec![1.0; 4]).unwrap();
            outputs.push(y);
        }
        assert!(kept.iter().any(|&k| k) && kept.iter().any(|&k| !k));
        assert_eq!(depth.pending(), 16);

        for y in outputs.iter().rev() {
            depth.backward(y).unwrap();
        }

        assert_eq!(depth.pending(), 0);
        let kept_count = kept.iter().filter(|&&k| k).count();
        assert_eq!(inner_meta.forward_count(), kept_count);
        assert_eq!(inner_meta.completed_backward_count(), kept_count);
        for (x, &k) in inputs.iter().zip(&kept) {
            let expected = if k { 5.0 } else { 1.0 };
            assert_eq!(x.grad(), Some(vec![expected; 2]));
            assert!(x.is_gradient_complete());
        }
    }

    #[test]
    fn test_residual_replays_even_when_skipped() {
        let residual: Box<dyn Operator> = Box::new(Scale::scale([2], Some(vec![3.0, 3.0])).unwrap());
        let residual_meta = Arc::clone(residual.meta());
        let mut depth = StochasticDepth::new(doubling(), Some(residual), 0.9, OperatorConfig::new("depth"))
            .unwrap()
            .with_seed(1);

        let x = Tensor::ones([2], 1);
        let mut outputs = Vec::new();
        for _ in 0..4 {
            let y = depth.forward(&x).unwrap();
            assert_eq!(&y.to_vec()[..2], &[3.0, 3.0]);
            y.set_grad(vec![1.0; 4]).unwrap();
            outputs.push(y);
        }
        for y in outputs.iter().rev() {
            depth.backward(y).unwrap();
        }
        assert_eq!(residual_meta.completed_backward_count(), 4);
        assert_eq!(x.use_count(), 0);
        assert_eq!(depth.parameters().len(), 2);
    }

    #[test]
    fn test_eval_mode_never_skips_or_scales() {
        let mut depth = StochasticDepth::new(doubling(), None, 0.75, OperatorConfig::new("depth"))
            .unwrap()
            .with_seed(9);
        depth.set_training(false);

        let x = Tensor::ones([2], 1);
        for _ in 0..8 {
            let y = depth.forward(&x).unwrap();
            assert_eq!(y.to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
        }
        assert_eq!(depth.predict(&x).unwrap().to_vec(), vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(depth.output_shape(&Shape::from([2])), Shape::from([4]));
    }

    #[test]
    fn test_failed_branch_unwinds_the_call() {
        let mismatched = || -> Box<dyn Operator> { Box::new(Scale::scale([3], None).unwrap()) };

        let mut depth = StochasticDepth::new(mismatched(), None, 0.0, OperatorConfig::new("depth")).unwrap();
        let x = Tensor::ones([2], 1);
        assert!(matches!(depth.forward(&x), Err(GradError::ShapeError(_))));
        assert_eq!(x.use_count(), 0);
        assert_eq!(depth.pending(), 0);

        let residual = Scale::scale([2], None).unwrap();
        let residual_weight = residual.transform().weight().clone();
        let residual_meta = Arc::clone(residual.meta());
        let mut depth = StochasticDepth::new(mismatched(), Some(Box::new(residual)), 0.0, OperatorConfig::new("depth"))
            .unwrap();
        assert!(depth.forward(&x).is_err());
        assert_eq!(depth.pending(), 0);
        assert_eq!(residual_meta.forward_count(), 1);
        assert_eq!(residual_meta.completed_backward_count(), 0);
        assert_eq!(residual_weight.use_count(), 0);
        assert!(!residual_weight.has_grad());
        assert_eq!(x.use_count(), 0);
    }

    #[test]
    fn test_rollback_unwinds_whole_call() {
        let inner = doubling();
        let inner_params = inner.parameters();
        let mut depth = StochasticDepth::new(inner, None, 0.0, OperatorConfig::new("depth")).unwrap();
        let x = Tensor::ones([2], 1);
        depth.forward(&x).unwrap();
        assert_eq!(x.use_count(), 2);

        depth.rollback().unwrap();
        assert_eq!(depth.pending(), 0);
        assert_eq!(x.use_count(), 0);
        assert_eq!(inner_params[0].use_count(), 0);
        assert!(matches!(depth.rollback(), Err(GradError::EmptyTrace(_))));
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let mut depth = StochasticDepth::new(doubling(), None, 0.5, OperatorConfig::new("depth")).unwrap();
        let y = Tensor::zeros([4], 1);
        assert!(matches!(depth.backward(&y), Err(GradError::EmptyTrace(_))));
    }
}
