//! Operator identity, construction options and the transform traits

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use crate::{
    config,
    error::GradResult,
    tensor::{Shape, Tensor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub u64);

impl OperatorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        OperatorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Identity and diagnostic counters of one operator instance.
///
/// Output tensors keep a weak reference to this, so it lives in an `Arc`
/// owned by the operator.
#[derive(Debug)]
pub struct OperatorMeta {
    id: OperatorId,
    name: String,
    input_labels: Vec<String>,
    output_labels: Vec<String>,
    forward_count: AtomicUsize,
    completed_backward: AtomicUsize,
}

impl OperatorMeta {
    pub fn new(name: &str, input_labels: Vec<String>, output_labels: Vec<String>) -> Self {
        Self {
            id: OperatorId::next(),
            name: name.to_string(),
            input_labels,
            output_labels,
            forward_count: AtomicUsize::new(0),
            completed_backward: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_labels(&self) -> &[String] {
        &self.input_labels
    }

    pub fn output_labels(&self) -> &[String] {
        &self.output_labels
    }

    pub fn forward_count(&self) -> usize {
        self.forward_count.load(Ordering::Acquire)
    }

    pub fn completed_backward_count(&self) -> usize {
        self.completed_backward.load(Ordering::Acquire)
    }

    pub(crate) fn record_forward(&self) {
        self.forward_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_backward(&self) {
        self.completed_backward.fetch_add(1, Ordering::AcqRel);
    }
}

/// Construction options shared by every operator.
///
/// `max_pending` and `verbose` default to the `trace` section of the
/// global configuration.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub name: String,
    pub input_labels: Vec<String>,
    pub output_labels: Vec<String>,
    pub max_pending: Option<usize>,
    pub verbose: bool,
}

impl OperatorConfig {
    pub fn new(name: &str) -> Self {
        let trace = config::get_config().trace;
        Self {
            name: name.to_string(),
            input_labels: Vec::new(),
            output_labels: Vec::new(),
            max_pending: trace.max_pending,
            verbose: trace.verbose,
        }
    }

    pub fn input_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.input_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.output_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Cap on outstanding forward calls
    pub fn max_pending(mut self, bound: usize) -> Self {
        self.max_pending = Some(bound);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.max_pending = None;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub(crate) fn into_meta(self) -> (OperatorMeta, Option<usize>, bool) {
        let meta = OperatorMeta::new(&self.name, self.input_labels, self.output_labels);
        (meta, self.max_pending, self.verbose)
    }
}

/// One input, one output
pub trait UnaryTransform: Send {
    /// State carried from a forward call to its backward call
    type Saved: Send;

    fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, Self::Saved)>;

    /// Accumulate into the gradients of `input` and of any parameters
    fn backward(&mut self, output_grad: &[f32], input: &Tensor, saved: Self::Saved) -> GradResult<()>;

    /// Inference path; defaults to the forward transform
    fn infer(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.forward(input).map(|(output, _)| output)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }

    fn output_shape(&self, input: &Shape) -> Shape {
        input.clone()
    }
}

/// Two inputs, one output
pub trait BinaryTransform: Send {
    type Saved: Send;

    fn forward(&mut self, a: &Tensor, b: &Tensor) -> GradResult<(Tensor, Self::Saved)>;

    fn backward(
        &mut self,
        output_grad: &[f32],
        a: &Tensor,
        b: &Tensor,
        saved: Self::Saved,
    ) -> GradResult<()>;

    fn infer(&mut self, a: &Tensor, b: &Tensor) -> GradResult<Tensor> {
        self.forward(a, b).map(|(output, _)| output)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// Variable number of inputs, one output
pub trait NaryTransform: Send {
    type Saved: Send;

    fn forward(&mut self, inputs: &[Tensor]) -> GradResult<(Tensor, Self::Saved)>;

    fn backward(&mut self, output_grad: &[f32], inputs: &[Tensor], saved: Self::Saved) -> GradResult<()>;

    fn infer(&mut self, inputs: &[Tensor]) -> GradResult<Tensor> {
        self.forward(inputs).map(|(output, _)| output)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// One input, several outputs; backward combines every output gradient
/// into one input gradient
pub trait SplitTransform: Send {
    type Saved: Send;

    fn forward(&mut self, input: &Tensor) -> GradResult<(Vec<Tensor>, Self::Saved)>;

    fn backward(
        &mut self,
        output_grads: &[Vec<f32>],
        input: &Tensor,
        saved: Self::Saved,
    ) -> GradResult<()>;

    fn infer(&mut self, input: &Tensor) -> GradResult<Vec<Tensor>> {
        self.forward(input).map(|(outputs, _)| outputs)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
