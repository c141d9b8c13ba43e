//! Activation functions

use std::sync::Arc;
use crate::{
    accel::{self, Accelerate, Accelerator, Execution, KernelPair},
    autograd::{OperatorConfig, Unary, UnaryTransform},
    error::{GradError, GradResult},
    tensor::Tensor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    Sigmoid,
    Tanh,
    Identity,
}

impl ActivationKind {
    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Relu => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Identity => "identity",
        }
    }

    pub fn from_name(name: &str) -> GradResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "relu" => Ok(ActivationKind::Relu),
            "sigmoid" => Ok(ActivationKind::Sigmoid),
            "tanh" => Ok(ActivationKind::Tanh),
            "identity" | "linear" => Ok(ActivationKind::Identity),
            other => Err(GradError::InvalidInput(format!("Unknown activation: {}", other))),
        }
    }

    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Identity => x,
        }
    }

    /// Derivative at input `x` whose activation is `y`
    #[inline]
    pub fn derivative(self, x: f32, y: f32) -> f32 {
        match self {
            ActivationKind::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationKind::Sigmoid => y * (1.0 - y),
            ActivationKind::Tanh => 1.0 - y * y,
            ActivationKind::Identity => 1.0,
        }
    }
}

/// Element-wise activation transform with an optional accelerated path
#[derive(Debug)]
pub struct ActivationOp {
    kind: ActivationKind,
    execution: Execution,
    requested: bool,
}

impl ActivationOp {
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            kind,
            execution: Execution::Cpu,
            requested: false,
        }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    fn activate(&self, input: &Tensor) -> GradResult<Tensor> {
        let data = match self.execution.kernels() {
            Some(pair) => pair.forward.dispatch_new(&[&input.data()[..]], input.len())?,
            None => input.data().iter().map(|&x| self.kind.apply(x)).collect(),
        };
        Tensor::new(input.shape().clone(), input.batch_count(), data)
    }
}

impl UnaryTransform for ActivationOp {
    /// The activated output; sigmoid and tanh derivatives are cheaper from it
    type Saved = Tensor;

    fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, Tensor)> {
        let output = self.activate(input)?;
        Ok((output.clone(), output))
    }

    fn backward(&mut self, output_grad: &[f32], input: &Tensor, output: Tensor) -> GradResult<()> {
        let x = input.data();
        let y = output.data();
        let contribution = match self.execution.kernels() {
            Some(pair) => pair.backward.dispatch_new(&[&x[..], &y[..], output_grad], x.len())?,
            None => x
                .iter()
                .zip(y.iter())
                .zip(output_grad)
                .map(|((&x, &y), &g)| g * self.kind.derivative(x, y))
                .collect(),
        };
        drop(x);
        input.accumulate_grad(&contribution)
    }

    fn infer(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.activate(input)
    }
}

impl Accelerate for ActivationOp {
    fn set_acceleration_enabled(&mut self, enabled: bool) -> bool {
        self.requested = enabled;
        if let Err(e) = self.create_kernels() {
            tracing::warn!(activation = self.kind.name(), "kernel binding failed: {}", e);
            self.execution = Execution::Cpu;
        }
        self.acceleration_enabled()
    }

    fn create_kernels(&mut self) -> GradResult<()> {
        let kind = self.kind;
        self.execution = accel::select_execution(kind.name(), self.requested, |device| {
            Ok(KernelPair {
                forward: Accelerator::compile(
                    device,
                    &format!("{}_forward", kind.name()),
                    1,
                    Arc::new(move |i: usize, a: &[&[f32]]| kind.apply(a[0][i])),
                )?,
                backward: Accelerator::compile(
                    device,
                    &format!("{}_backward", kind.name()),
                    3,
                    Arc::new(move |i: usize, a: &[&[f32]]| a[2][i] * kind.derivative(a[0][i], a[1][i])),
                )?,
            })
        })?;
        Ok(())
    }

    fn acceleration_enabled(&self) -> bool {
        self.execution.is_accelerated()
    }
}

pub type Activation = Unary<ActivationOp>;

impl Activation {
    pub fn from_kind(kind: ActivationKind) -> Self {
        Unary::new(ActivationOp::new(kind), OperatorConfig::new(kind.name()))
    }

    pub fn relu() -> Self {
        Self::from_kind(ActivationKind::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::from_kind(ActivationKind::Sigmoid)
    }

    pub fn tanh() -> Self {
        Self::from_kind(ActivationKind::Tanh)
    }
}
