//! Parametrised affine operators: per-feature scale, per-feature shift and
//! a dense layer

use std::sync::Arc;
use rand::Rng;
use crate::{
    accel::{self, Accelerate, Accelerator, Execution, KernelPair},
    autograd::{OperatorConfig, Unary, UnaryTransform},
    error::{GradError, GradResult},
    tensor::{ops::sum_samples, Shape, Tensor},
};

fn ensure_features(operator: &str, param: &Tensor, input: &Tensor) -> GradResult<()> {
    if input.item_len() != param.len() {
        return Err(GradError::shape_error(
            &format!("{} features per sample", param.len()),
            &format!("{}", input.item_len()),
            Some(&format!("Input of '{}' must match its parameter shape {}", operator, param.shape())),
        ));
    }
    Ok(())
}

fn parameter(shape: Shape, init: Option<Vec<f32>>, fill: f32) -> GradResult<Tensor> {
    if !shape.is_valid() {
        return Err(GradError::InvalidInput(format!("Parameter shape {} has an empty dimension", shape)));
    }
    match init {
        Some(data) => Tensor::new(shape, 1, data),
        None => Ok(Tensor::full(shape, 1, fill)),
    }
}

/// `y = x * w`, with `w` broadcast over the batch
#[derive(Debug)]
pub struct ScaleOp {
    weight: Tensor,
    execution: Execution,
    requested: bool,
}

impl ScaleOp {
    /// Weight defaults to ones
    pub fn new(shape: impl Into<Shape>, init: Option<Vec<f32>>) -> GradResult<Self> {
        Ok(Self {
            weight: parameter(shape.into(), init, 1.0)?,
            execution: Execution::Cpu,
            requested: false,
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn scale(&self, input: &Tensor) -> GradResult<Tensor> {
        ensure_features("scale", &self.weight, input)?;
        let x = input.data();
        let w = self.weight.data();
        let data = match self.execution.kernels() {
            Some(pair) => pair.forward.dispatch_new(&[&x[..], &w[..]], x.len())?,
            None => x
                .chunks_exact(w.len())
                .flat_map(|row| row.iter().zip(w.iter()).map(|(a, b)| a * b))
                .collect(),
        };
        Tensor::new(input.shape().clone(), input.batch_count(), data)
    }
}

impl UnaryTransform for ScaleOp {
    type Saved = ();

    fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, ())> {
        Ok((self.scale(input)?, ()))
    }

    fn backward(&mut self, output_grad: &[f32], input: &Tensor, _: ()) -> GradResult<()> {
        let width = self.weight.len();
        let (input_grad, weight_grad) = {
            let x = input.data();
            let w = self.weight.data();
            let input_grad = match self.execution.kernels() {
                Some(pair) => pair.backward.dispatch_new(&[output_grad, &w[..]], output_grad.len())?,
                None => output_grad
                    .chunks_exact(width)
                    .flat_map(|row| row.iter().zip(w.iter()).map(|(g, w)| g * w))
                    .collect(),
            };
            let products: Vec<f32> = output_grad.iter().zip(x.iter()).map(|(g, x)| g * x).collect();
            (input_grad, sum_samples(&products, width))
        };
        input.accumulate_grad(&input_grad)?;
        self.weight.accumulate_grad(&weight_grad)
    }

    fn infer(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.scale(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone()]
    }
}

impl Accelerate for ScaleOp {
    fn set_acceleration_enabled(&mut self, enabled: bool) -> bool {
        self.requested = enabled;
        if let Err(e) = self.create_kernels() {
            tracing::warn!("scale kernel binding failed: {}", e);
            self.execution = Execution::Cpu;
        }
        self.acceleration_enabled()
    }

    fn create_kernels(&mut self) -> GradResult<()> {
        self.execution = accel::select_execution("scale", self.requested, |device| {
            Ok(KernelPair {
                forward: Accelerator::compile(
                    device,
                    "scale_forward",
                    2,
                    Arc::new(|i: usize, a: &[&[f32]]| a[0][i] * a[1][i % a[1].len()]),
                )?,
                backward: Accelerator::compile(
                    device,
                    "scale_backward",
                    2,
                    Arc::new(|i: usize, a: &[&[f32]]| a[0][i] * a[1][i % a[1].len()]),
                )?,
            })
        })?;
        Ok(())
    }

    fn acceleration_enabled(&self) -> bool {
        self.execution.is_accelerated()
    }
}

/// `y = x + b`, with `b` broadcast over the batch
#[derive(Debug)]
pub struct ShiftOp {
    bias: Tensor,
    execution: Execution,
    requested: bool,
}

impl ShiftOp {
    /// Bias defaults to zeros
    pub fn new(shape: impl Into<Shape>, init: Option<Vec<f32>>) -> GradResult<Self> {
        Ok(Self {
            bias: parameter(shape.into(), init, 0.0)?,
            execution: Execution::Cpu,
            requested: false,
        })
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    fn shift(&self, input: &Tensor) -> GradResult<Tensor> {
        ensure_features("shift", &self.bias, input)?;
        let x = input.data();
        let b = self.bias.data();
        let data = match self.execution.kernels() {
            Some(pair) => pair.forward.dispatch_new(&[&x[..], &b[..]], x.len())?,
            None => x
                .chunks_exact(b.len())
                .flat_map(|row| row.iter().zip(b.iter()).map(|(x, b)| x + b))
                .collect(),
        };
        Tensor::new(input.shape().clone(), input.batch_count(), data)
    }
}

impl UnaryTransform for ShiftOp {
    type Saved = ();

    fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, ())> {
        Ok((self.shift(input)?, ()))
    }

    fn backward(&mut self, output_grad: &[f32], input: &Tensor, _: ()) -> GradResult<()> {
        match self.execution.kernels() {
            Some(pair) => {
                let passed = pair.backward.dispatch_new(&[output_grad], output_grad.len())?;
                input.accumulate_grad(&passed)?;
            }
            None => input.accumulate_grad(output_grad)?,
        }
        self.bias.accumulate_grad(&sum_samples(output_grad, self.bias.len()))
    }

    fn infer(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.shift(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.bias.clone()]
    }
}

impl Accelerate for ShiftOp {
    fn set_acceleration_enabled(&mut self, enabled: bool) -> bool {
        self.requested = enabled;
        if let Err(e) = self.create_kernels() {
            tracing::warn!("shift kernel binding failed: {}", e);
            self.execution = Execution::Cpu;
        }
        self.acceleration_enabled()
    }

    fn create_kernels(&mut self) -> GradResult<()> {
        self.execution = accel::select_execution("shift", self.requested, |device| {
            Ok(KernelPair {
                forward: Accelerator::compile(
                    device,
                    "shift_forward",
                    2,
                    Arc::new(|i: usize, a: &[&[f32]]| a[0][i] + a[1][i % a[1].len()]),
                )?,
                backward: Accelerator::compile(
                    device,
                    "shift_backward",
                    1,
                    Arc::new(|i: usize, a: &[&[f32]]| a[0][i]),
                )?,
            })
        })?;
        Ok(())
    }

    fn acceleration_enabled(&self) -> bool {
        self.execution.is_accelerated()
    }
}

/// Dense layer `y = W x + b` on flattened samples; `W` is `[out, in]`
#[derive(Debug)]
pub struct LinearOp {
    in_features: usize,
    out_features: usize,
    weight: Tensor,
    bias: Tensor,
}

fn ensure_dims(in_features: usize, out_features: usize) -> GradResult<()> {
    if in_features == 0 || out_features == 0 {
        return Err(GradError::InvalidInput(format!(
            "Dense layer needs positive feature counts, got {} -> {}",
            in_features, out_features
        )));
    }
    Ok(())
}

impl LinearOp {
    /// Weight ones, bias zeros
    pub fn new(in_features: usize, out_features: usize) -> GradResult<Self> {
        ensure_dims(in_features, out_features)?;
        Ok(Self {
            in_features,
            out_features,
            weight: Tensor::ones([out_features, in_features], 1),
            bias: Tensor::zeros([out_features], 1),
        })
    }

    pub fn with_params(
        in_features: usize,
        out_features: usize,
        weight: Vec<f32>,
        bias: Vec<f32>,
    ) -> GradResult<Self> {
        ensure_dims(in_features, out_features)?;
        Ok(Self {
            in_features,
            out_features,
            weight: Tensor::new([out_features, in_features], 1, weight)?,
            bias: Tensor::new([out_features], 1, bias)?,
        })
    }

    /// Xavier-uniform weight, zero bias
    pub fn random<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> GradResult<Self> {
        ensure_dims(in_features, out_features)?;
        let limit = (6.0 / (in_features + out_features) as f32).sqrt();
        Ok(Self {
            in_features,
            out_features,
            weight: Tensor::uniform([out_features, in_features], 1, -limit, limit, rng),
            bias: Tensor::zeros([out_features], 1),
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    fn affine(&self, input: &Tensor) -> GradResult<Tensor> {
        if input.item_len() != self.in_features {
            return Err(GradError::shape_error(
                &format!("{} input features", self.in_features),
                &format!("{}", input.item_len()),
                None,
            ));
        }
        let x = input.data();
        let w = self.weight.data();
        let b = self.bias.data();
        let mut data = Vec::with_capacity(input.batch_count() * self.out_features);
        for row in x.chunks_exact(self.in_features) {
            for (o, w_row) in w.chunks_exact(self.in_features).enumerate() {
                let dot: f32 = w_row.iter().zip(row).map(|(w, x)| w * x).sum();
                data.push(dot + b[o]);
            }
        }
        Tensor::new([self.out_features], input.batch_count(), data)
    }
}

impl UnaryTransform for LinearOp {
    type Saved = ();

    fn forward(&mut self, input: &Tensor) -> GradResult<(Tensor, ())> {
        Ok((self.affine(input)?, ()))
    }

    fn backward(&mut self, output_grad: &[f32], input: &Tensor, _: ()) -> GradResult<()> {
        let (n_in, n_out) = (self.in_features, self.out_features);
        let mut input_grad = vec![0.0; input.len()];
        let mut weight_grad = vec![0.0; n_in * n_out];
        {
            let x = input.data();
            let w = self.weight.data();
            for (b, g_row) in output_grad.chunks_exact(n_out).enumerate() {
                let x_row = &x[b * n_in..(b + 1) * n_in];
                let dx = &mut input_grad[b * n_in..(b + 1) * n_in];
                for (o, &g) in g_row.iter().enumerate() {
                    let w_row = &w[o * n_in..(o + 1) * n_in];
                    let dw = &mut weight_grad[o * n_in..(o + 1) * n_in];
                    for i in 0..n_in {
                        dx[i] += w_row[i] * g;
                        dw[i] += x_row[i] * g;
                    }
                }
            }
        }
        input.accumulate_grad(&input_grad)?;
        self.weight.accumulate_grad(&weight_grad)?;
        self.bias.accumulate_grad(&sum_samples(output_grad, n_out))
    }

    fn infer(&mut self, input: &Tensor) -> GradResult<Tensor> {
        self.affine(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn output_shape(&self, _input: &Shape) -> Shape {
        Shape::from([self.out_features])
    }
}

pub type Scale = Unary<ScaleOp>;
pub type Shift = Unary<ShiftOp>;
pub type Linear = Unary<LinearOp>;

impl Scale {
    pub fn scale(shape: impl Into<Shape>, init: Option<Vec<f32>>) -> GradResult<Self> {
        Ok(Unary::new(ScaleOp::new(shape, init)?, OperatorConfig::new("scale")))
    }
}

impl Shift {
    pub fn shift(shape: impl Into<Shape>, init: Option<Vec<f32>>) -> GradResult<Self> {
        Ok(Unary::new(ShiftOp::new(shape, init)?, OperatorConfig::new("shift")))
    }
}

impl Linear {
    pub fn dense(in_features: usize, out_features: usize) -> GradResult<Self> {
        Ok(Unary::new(LinearOp::new(in_features, out_features)?, OperatorConfig::new("linear")))
    }
}
