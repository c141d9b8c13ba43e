//! Arity adapters: push/pop replay around a transform pair
//!
//! An adapter owns the operator's [`OperatorMeta`] and [`Trace`]. Forward
//! records one use on every input and parameter, runs the transform and
//! pushes a frame; backward pops the most recent frame, hands the output
//! gradient to the backward transform and releases those uses again.
//! Backward calls on one instance must come in exactly the reverse order
//! of its forward calls.

use std::sync::Arc;
use crate::{
    accel::Accelerate,
    error::{GradError, GradResult},
    tensor::{Shape, Tensor},
};
use super::function::{
    BinaryTransform, NaryTransform, OperatorConfig, OperatorMeta, SplitTransform, UnaryTransform,
};
use super::trace::{Trace, TraceEntry};

/// Object-safe single-input/single-output view of an operator
pub trait Operator: Send {
    fn meta(&self) -> &Arc<OperatorMeta>;

    fn forward(&mut self, input: &Tensor) -> GradResult<Tensor>;

    /// Replay the most recent outstanding forward call using the
    /// gradient accumulated on its `output`
    fn backward(&mut self, output: &Tensor) -> GradResult<()>;

    /// Drop the most recent outstanding forward call without replaying it,
    /// releasing the uses it recorded. No gradient is written.
    fn rollback(&mut self) -> GradResult<()>;

    /// Evaluate without recording anything for backward
    fn predict(&mut self, input: &Tensor) -> GradResult<Tensor>;

    fn parameters(&self) -> Vec<Tensor>;

    /// Outstanding forward calls
    fn pending(&self) -> usize;

    fn output_shape(&self, input: &Shape) -> Shape {
        input.clone()
    }

    fn name(&self) -> &str {
        self.meta().name()
    }
}

/// Record one use on each tensor, undoing them all if any one fails
fn record_uses<'a>(tensors: impl IntoIterator<Item = &'a Tensor>) -> GradResult<()> {
    let mut recorded: Vec<&Tensor> = Vec::new();
    for tensor in tensors {
        if let Err(e) = tensor.record_use() {
            release(recorded);
            return Err(e);
        }
        recorded.push(tensor);
    }
    Ok(())
}

/// Roll back uses recorded for a forward call that did not complete
fn release<'a>(tensors: impl IntoIterator<Item = &'a Tensor>) {
    for tensor in tensors {
        let _ = tensor.record_consumed();
    }
}

fn consume<'a>(tensors: impl IntoIterator<Item = &'a Tensor>) -> GradResult<()> {
    for tensor in tensors {
        tensor.record_consumed()?;
    }
    Ok(())
}

/// Debug builds only
fn check_arity(operator: &str, expected: usize, got: usize) -> GradResult<()> {
    if cfg!(debug_assertions) && expected != got {
        return Err(GradError::arity(operator, expected, got));
    }
    Ok(())
}

fn new_parts<A>(config: OperatorConfig) -> (Arc<OperatorMeta>, Trace<A>, bool) {
    let (meta, bound, verbose) = config.into_meta();
    let trace = Trace::new(meta.name(), bound);
    (Arc::new(meta), trace, verbose)
}

/// 1 → 1 adapter
pub struct Unary<T: UnaryTransform> {
    meta: Arc<OperatorMeta>,
    trace: Trace<T::Saved>,
    verbose: bool,
    transform: T,
}

impl<T: UnaryTransform> Unary<T> {
    pub fn new(transform: T, config: OperatorConfig) -> Self {
        let (meta, trace, verbose) = new_parts(config);
        Self {
            meta,
            trace,
            verbose,
            transform,
        }
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut T {
        &mut self.transform
    }

    pub fn trace(&self) -> &Trace<T::Saved> {
        &self.trace
    }

    pub fn forward(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.trace.check_capacity()?;
        let params = self.transform.parameters();
        record_uses(std::iter::once(input).chain(&params))?;

        let (output, saved) = match self.transform.forward(input) {
            Ok(result) => result,
            Err(e) => {
                release(std::iter::once(input).chain(&params));
                return Err(e);
            }
        };
        output.set_producer(&self.meta);
        self.trace.push(TraceEntry::new(vec![input.clone()], saved))?;
        self.meta.record_forward();

        if self.verbose {
            tracing::debug!(
                operator = self.meta.name(),
                input = %input.id(),
                output = %output.id(),
                pending = self.trace.len(),
                "forward"
            );
        }
        Ok(output)
    }

    pub fn backward(&mut self, output: &Tensor) -> GradResult<()> {
        let TraceEntry { inputs, aux } = self.trace.pop()?;
        check_arity(self.meta.name(), 1, inputs.len())?;
        let input = &inputs[0];

        let output_grad = output.grad_or_zeros();
        self.transform.backward(&output_grad, input, aux)?;

        let params = self.transform.parameters();
        consume(std::iter::once(input).chain(&params))?;
        self.meta.record_backward();

        if self.verbose {
            tracing::debug!(
                operator = self.meta.name(),
                input = %input.id(),
                pending = self.trace.len(),
                "backward"
            );
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> GradResult<()> {
        let TraceEntry { inputs, .. } = self.trace.pop()?;
        let params = self.transform.parameters();
        consume(inputs.iter().chain(&params))?;
        if self.verbose {
            tracing::debug!(operator = self.meta.name(), pending = self.trace.len(), "rollback");
        }
        Ok(())
    }

    pub fn predict(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.transform.infer(input)
    }
}

impl<T: UnaryTransform> Operator for Unary<T> {
    fn meta(&self) -> &Arc<OperatorMeta> {
        &self.meta
    }

    fn forward(&mut self, input: &Tensor) -> GradResult<Tensor> {
        Unary::forward(self, input)
    }

    fn backward(&mut self, output: &Tensor) -> GradResult<()> {
        Unary::backward(self, output)
    }

    fn rollback(&mut self) -> GradResult<()> {
        Unary::rollback(self)
    }

    fn predict(&mut self, input: &Tensor) -> GradResult<Tensor> {
        Unary::predict(self, input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.transform.parameters()
    }

    fn pending(&self) -> usize {
        self.trace.len()
    }

    fn output_shape(&self, input: &Shape) -> Shape {
        self.transform.output_shape(input)
    }
}

impl<T: UnaryTransform + Accelerate> Accelerate for Unary<T> {
    fn set_acceleration_enabled(&mut self, enabled: bool) -> bool {
        self.transform.set_acceleration_enabled(enabled)
    }

    fn create_kernels(&mut self) -> GradResult<()> {
        self.transform.create_kernels()
    }

    fn acceleration_enabled(&self) -> bool {
        self.transform.acceleration_enabled()
    }
}

/// 2 → 1 adapter
pub struct Binary<T: BinaryTransform> {
    meta: Arc<OperatorMeta>,
    trace: Trace<T::Saved>,
    verbose: bool,
    transform: T,
}

impl<T: BinaryTransform> Binary<T> {
    pub fn new(transform: T, config: OperatorConfig) -> Self {
        let (meta, trace, verbose) = new_parts(config);
        Self {
            meta,
            trace,
            verbose,
            transform,
        }
    }

    pub fn meta(&self) -> &Arc<OperatorMeta> {
        &self.meta
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut T {
        &mut self.transform
    }

    pub fn pending(&self) -> usize {
        self.trace.len()
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        self.transform.parameters()
    }

    pub fn forward(&mut self, a: &Tensor, b: &Tensor) -> GradResult<Tensor> {
        self.trace.check_capacity()?;
        let params = self.transform.parameters();
        record_uses([a, b].into_iter().chain(&params))?;

        let (output, saved) = match self.transform.forward(a, b) {
            Ok(result) => result,
            Err(e) => {
                release([a, b].into_iter().chain(&params));
                return Err(e);
            }
        };
        output.set_producer(&self.meta);
        self.trace.push(TraceEntry::new(vec![a.clone(), b.clone()], saved))?;
        self.meta.record_forward();

        if self.verbose {
            tracing::debug!(operator = self.meta.name(), output = %output.id(), "forward");
        }
        Ok(output)
    }

    pub fn backward(&mut self, output: &Tensor) -> GradResult<()> {
        let TraceEntry { inputs, aux } = self.trace.pop()?;
        check_arity(self.meta.name(), 2, inputs.len())?;

        let output_grad = output.grad_or_zeros();
        self.transform.backward(&output_grad, &inputs[0], &inputs[1], aux)?;

        let params = self.transform.parameters();
        consume(inputs.iter().chain(&params))?;
        self.meta.record_backward();

        if self.verbose {
            tracing::debug!(operator = self.meta.name(), pending = self.trace.len(), "backward");
        }
        Ok(())
    }

    pub fn predict(&mut self, a: &Tensor, b: &Tensor) -> GradResult<Tensor> {
        self.transform.infer(a, b)
    }
}

/// N → 1 adapter; every input's use-count moves in lockstep
pub struct Nary<T: NaryTransform> {
    meta: Arc<OperatorMeta>,
    trace: Trace<T::Saved>,
    verbose: bool,
    arity: Option<usize>,
    transform: T,
}

impl<T: NaryTransform> Nary<T> {
    pub fn new(transform: T, config: OperatorConfig) -> Self {
        let (meta, trace, verbose) = new_parts(config);
        Self {
            meta,
            trace,
            verbose,
            arity: None,
            transform,
        }
    }

    /// Declare the number of inputs every call takes
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn meta(&self) -> &Arc<OperatorMeta> {
        &self.meta
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn pending(&self) -> usize {
        self.trace.len()
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        self.transform.parameters()
    }

    fn check_inputs(&self, inputs: &[Tensor]) -> GradResult<()> {
        if inputs.is_empty() {
            return Err(GradError::InvalidInput(format!(
                "'{}' needs at least one input",
                self.meta.name()
            )));
        }
        match self.arity {
            Some(arity) => check_arity(self.meta.name(), arity, inputs.len()),
            None => Ok(()),
        }
    }

    pub fn forward(&mut self, inputs: &[Tensor]) -> GradResult<Tensor> {
        self.check_inputs(inputs)?;
        self.trace.check_capacity()?;
        let params = self.transform.parameters();
        record_uses(inputs.iter().chain(&params))?;

        let (output, saved) = match self.transform.forward(inputs) {
            Ok(result) => result,
            Err(e) => {
                release(inputs.iter().chain(&params));
                return Err(e);
            }
        };
        output.set_producer(&self.meta);
        self.trace.push(TraceEntry::new(inputs.to_vec(), saved))?;
        self.meta.record_forward();

        if self.verbose {
            tracing::debug!(
                operator = self.meta.name(),
                inputs = inputs.len(),
                output = %output.id(),
                "forward"
            );
        }
        Ok(output)
    }

    pub fn backward(&mut self, output: &Tensor) -> GradResult<()> {
        let TraceEntry { inputs, aux } = self.trace.pop()?;
        if let Some(arity) = self.arity {
            check_arity(self.meta.name(), arity, inputs.len())?;
        }

        let output_grad = output.grad_or_zeros();
        self.transform.backward(&output_grad, &inputs, aux)?;

        let params = self.transform.parameters();
        consume(inputs.iter().chain(&params))?;
        self.meta.record_backward();

        if self.verbose {
            tracing::debug!(operator = self.meta.name(), inputs = inputs.len(), "backward");
        }
        Ok(())
    }

    pub fn predict(&mut self, inputs: &[Tensor]) -> GradResult<Tensor> {
        self.check_inputs(inputs)?;
        self.transform.infer(inputs)
    }
}

/// 1 → N adapter
pub struct Split<T: SplitTransform> {
    meta: Arc<OperatorMeta>,
    trace: Trace<(usize, T::Saved)>,
    verbose: bool,
    transform: T,
}

impl<T: SplitTransform> Split<T> {
    pub fn new(transform: T, config: OperatorConfig) -> Self {
        let (meta, trace, verbose) = new_parts(config);
        Self {
            meta,
            trace,
            verbose,
            transform,
        }
    }

    pub fn meta(&self) -> &Arc<OperatorMeta> {
        &self.meta
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn pending(&self) -> usize {
        self.trace.len()
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        self.transform.parameters()
    }

    pub fn forward(&mut self, input: &Tensor) -> GradResult<Vec<Tensor>> {
        self.trace.check_capacity()?;
        let params = self.transform.parameters();
        record_uses(std::iter::once(input).chain(&params))?;

        let (outputs, saved) = match self.transform.forward(input) {
            Ok(result) => result,
            Err(e) => {
                release(std::iter::once(input).chain(&params));
                return Err(e);
            }
        };
        for output in &outputs {
            output.set_producer(&self.meta);
        }
        self.trace
            .push(TraceEntry::new(vec![input.clone()], (outputs.len(), saved)))?;
        self.meta.record_forward();

        if self.verbose {
            tracing::debug!(operator = self.meta.name(), outputs = outputs.len(), "forward");
        }
        Ok(outputs)
    }

    /// `outputs` is the full list returned by the matching forward call
    pub fn backward(&mut self, outputs: &[Tensor]) -> GradResult<()> {
        let TraceEntry { inputs, aux: (produced, saved) } = self.trace.pop()?;
        check_arity(self.meta.name(), 1, inputs.len())?;
        check_arity(self.meta.name(), produced, outputs.len())?;
        let input = &inputs[0];

        let output_grads: Vec<Vec<f32>> = outputs.iter().map(Tensor::grad_or_zeros).collect();
        self.transform.backward(&output_grads, input, saved)?;

        let params = self.transform.parameters();
        consume(std::iter::once(input).chain(&params))?;
        self.meta.record_backward();

        if self.verbose {
            tracing::debug!(operator = self.meta.name(), pending = self.trace.len(), "backward");
        }
        Ok(())
    }

    pub fn predict(&mut self, input: &Tensor) -> GradResult<Vec<Tensor>> {
        self.transform.infer(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = w * x with a single shared scalar weight
    struct Weighted {
        weight: Tensor,
    }

    impl UnaryTransform for Weighted {
        type Saved = ();

        fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, ())> {
            let w = self.weight.data()[0];
            let data = input.data().iter().map(|x| w * x).collect();
            Ok((Tensor::new(input.shape().clone(), input.batch_count(), data)?, ()))
        }

        fn backward(&mut self, output_grad: &[f32], input: &Tensor, _: ()) -> GradResult<()> {
            let w = self.weight.data()[0];
            let x = input.to_vec();
            input.accumulate_grad_with(|g| {
                for (gi, go) in g.iter_mut().zip(output_grad) {
                    *gi += w * go;
                }
            });
            let dw: f32 = x.iter().zip(output_grad).map(|(x, g)| x * g).sum();
            self.weight.accumulate_grad(&[dw])
        }

        fn parameters(&self) -> Vec<Tensor> {
            vec![self.weight.clone()]
        }
    }

    struct Sum;

    impl BinaryTransform for Sum {
        type Saved = ();

        fn forward(&mut self, a: &Tensor, b: &Tensor) -> GradResult<(Tensor, ())> {
            let data = a.data().iter().zip(b.data().iter()).map(|(x, y)| x + y).collect();
            Ok((Tensor::new(a.shape().clone(), a.batch_count(), data)?, ()))
        }

        fn backward(&mut self, g: &[f32], a: &Tensor, b: &Tensor, _: ()) -> GradResult<()> {
            a.accumulate_grad(g)?;
            b.accumulate_grad(g)
        }
    }

    struct Total;

    impl NaryTransform for Total {
        type Saved = usize;

        fn forward(&mut self, inputs: &[Tensor]) -> GradResult<(Tensor, usize)> {
            let mut data = vec![0.0; inputs[0].len()];
            for input in inputs {
                for (d, x) in data.iter_mut().zip(input.data().iter()) {
                    *d += x;
                }
            }
            let output = Tensor::new(inputs[0].shape().clone(), inputs[0].batch_count(), data)?;
            Ok((output, inputs.len()))
        }

        fn backward(&mut self, g: &[f32], inputs: &[Tensor], count: usize) -> GradResult<()> {
            assert_eq!(count, inputs.len());
            for input in inputs {
                input.accumulate_grad(g)?;
            }
            Ok(())
        }
    }

    struct Halves;

    impl SplitTransform for Halves {
        type Saved = ();

        fn forward(&mut self, input: &Tensor) -> GradResult<(Vec<Tensor>, ())> {
            let data = input.to_vec();
            let half = data.len() / 2;
            Ok((
                vec![
                    Tensor::from_vec(data[..half].to_vec(), [half])?,
                    Tensor::from_vec(data[half..].to_vec(), [half])?,
                ],
                (),
            ))
        }

        fn backward(&mut self, grads: &[Vec<f32>], input: &Tensor, _: ()) -> GradResult<()> {
            let joined: Vec<f32> = grads.iter().flatten().copied().collect();
            input.accumulate_grad(&joined)
        }
    }

    fn weighted(weight: f32) -> (Unary<Weighted>, Tensor) {
        let w = Tensor::full([1], 1, weight);
        let op = Unary::new(Weighted { weight: w.clone() }, OperatorConfig::new("weighted"));
        (op, w)
    }

    #[test]
    fn test_balanced_sequence_empties_trace() {
        let (mut op, _) = weighted(2.0);
        let x = Tensor::ones([2], 1);

        let y1 = op.forward(&x).unwrap();
        let y2 = op.forward(&y1).unwrap();
        assert_eq!(op.pending(), 2);
        assert_eq!(y2.to_vec(), vec![4.0, 4.0]);
        assert_eq!(y2.producer().unwrap().id(), op.meta().id());

        y2.set_grad(vec![1.0, 1.0]).unwrap();
        op.backward(&y2).unwrap();
        op.backward(&y1).unwrap();

        assert_eq!(op.pending(), 0);
        assert_eq!(op.trace().pushes(), op.trace().pops());
        assert_eq!(op.meta().completed_backward_count(), op.meta().forward_count());
        assert_eq!(x.grad(), Some(vec![4.0, 4.0]));
    }

    #[test]
    fn test_reused_weight_completes_after_last_backward() {
        let (mut op, w) = weighted(0.5);
        let x = Tensor::ones([1], 1);

        let mut outputs = vec![x.clone()];
        for _ in 0..3 {
            let next = op.forward(outputs.last().unwrap()).unwrap();
            outputs.push(next);
        }
        assert_eq!(w.use_count(), 3);
        outputs[3].set_grad(vec![1.0]).unwrap();

        for step in (1..=3).rev() {
            assert!(!w.is_gradient_complete());
            op.backward(&outputs[step]).unwrap();
        }
        assert_eq!(w.use_count(), 0);
        assert!(w.is_gradient_complete());
        assert!(x.is_gradient_complete());
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let (mut op, _) = weighted(1.0);
        let y = Tensor::zeros([1], 1);
        assert!(matches!(op.backward(&y), Err(GradError::EmptyTrace(_))));
    }

    #[test]
    fn test_rollback_releases_uses_without_gradient() {
        let (mut op, w) = weighted(2.0);
        let x = Tensor::ones([1], 1);
        op.forward(&x).unwrap();
        op.forward(&x).unwrap();
        assert_eq!(w.use_count(), 2);

        op.rollback().unwrap();
        assert_eq!(op.pending(), 1);
        assert_eq!(x.use_count(), 1);
        assert_eq!(w.use_count(), 1);
        assert!(!w.has_grad());
        assert_eq!(op.meta().completed_backward_count(), 0);

        op.rollback().unwrap();
        assert_eq!(x.use_count(), 0);
        assert!(!x.is_gradient_complete());
        assert!(matches!(op.rollback(), Err(GradError::EmptyTrace(_))));
    }

    #[test]
    fn test_max_pending_bounds_forward() {
        let w = Tensor::ones([1], 1);
        let mut op = Unary::new(
            Weighted { weight: w.clone() },
            OperatorConfig::new("bounded").max_pending(1),
        );
        let x = Tensor::ones([1], 1);
        op.forward(&x).unwrap();
        assert!(matches!(op.forward(&x), Err(GradError::TraceOverflow { .. })));
        assert_eq!(x.use_count(), 1);
        assert_eq!(w.use_count(), 1);
    }

    #[test]
    fn test_use_limit_rolls_back_partial_uses() {
        let w = Tensor::ones([1], 1).with_use_limit(1);
        let mut op = Unary::new(Weighted { weight: w.clone() }, OperatorConfig::new("limited"));
        let x = Tensor::ones([1], 1);
        op.forward(&x).unwrap();
        assert!(matches!(op.forward(&x), Err(GradError::UseLimitExceeded { .. })));
        assert_eq!(x.use_count(), 1);
        assert_eq!(op.pending(), 1);
    }

    #[test]
    fn test_predict_records_nothing() {
        let (mut op, w) = weighted(3.0);
        let x = Tensor::ones([1], 1);
        let y = op.predict(&x).unwrap();
        assert_eq!(y.to_vec(), vec![3.0]);
        assert_eq!(op.pending(), 0);
        assert_eq!(x.use_count(), 0);
        assert_eq!(w.use_count(), 0);
        assert!(!y.has_producer());
    }

    #[test]
    fn test_binary_same_tensor_twice() {
        let mut op = Binary::new(Sum, OperatorConfig::new("sum"));
        let x = Tensor::ones([2], 1);
        let y = op.forward(&x, &x).unwrap();
        assert_eq!(x.use_count(), 2);

        y.set_grad(vec![1.0, 2.0]).unwrap();
        op.backward(&y).unwrap();
        assert_eq!(x.use_count(), 0);
        assert_eq!(x.grad(), Some(vec![2.0, 4.0]));
    }

    #[test]
    fn test_nary_moves_all_inputs_together() {
        let mut op = Nary::new(Total, OperatorConfig::new("total")).with_arity(3);
        let inputs: Vec<Tensor> = (0..3).map(|_| Tensor::ones([1], 1)).collect();
        let y = op.forward(&inputs).unwrap();
        assert_eq!(y.to_vec(), vec![3.0]);
        assert!(inputs.iter().all(|t| t.use_count() == 1));

        y.set_grad(vec![1.0]).unwrap();
        op.backward(&y).unwrap();
        assert!(inputs.iter().all(|t| t.is_gradient_complete()));
        assert!(op.forward(&[]).is_err());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_nary_checks_declared_arity() {
        let mut op = Nary::new(Total, OperatorConfig::new("total")).with_arity(2);
        let inputs = vec![Tensor::ones([1], 1)];
        assert!(matches!(
            op.forward(&inputs),
            Err(GradError::ArityMismatch { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            op.predict(&inputs),
            Err(GradError::ArityMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_nary_predict_rejects_empty_inputs() {
        let mut op = Nary::new(Total, OperatorConfig::new("total"));
        assert!(matches!(op.predict(&[]), Err(GradError::InvalidInput(_))));
        let inputs = vec![Tensor::ones([1], 1), Tensor::ones([1], 1)];
        assert_eq!(op.predict(&inputs).unwrap().to_vec(), vec![2.0]);
        assert_eq!(op.pending(), 0);
    }

    #[test]
    fn test_split_combines_output_gradients() {
        let mut op = Split::new(Halves, OperatorConfig::new("halves"));
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], [4]).unwrap();
        let outputs = op.forward(&x).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].to_vec(), vec![3.0, 4.0]);

        outputs[0].set_grad(vec![1.0, 1.0]).unwrap();
        op.backward(&outputs).unwrap();
        assert_eq!(x.grad(), Some(vec![1.0, 1.0, 0.0, 0.0]));
        assert_eq!(op.pending(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_split_checks_output_count() {
        let mut op = Split::new(Halves, OperatorConfig::new("halves"));
        let x = Tensor::ones([2], 1);
        let outputs = op.forward(&x).unwrap();
        let err = op.backward(&outputs[..1]).unwrap_err();
        assert!(matches!(err, GradError::ArityMismatch { expected: 2, got: 1, .. }));
    }
}
