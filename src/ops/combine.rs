//! Operators joining or splitting tensors

use crate::{
    autograd::{Binary, BinaryTransform, Nary, NaryTransform, OperatorConfig, Split, SplitTransform},
    error::{GradError, GradResult},
    tensor::{
        ops::{concat_samples, ensure_same_layout, split_samples},
        Shape, Tensor,
    },
};

/// Element-wise sum of two tensors with the same layout
#[derive(Debug, Default)]
pub struct AddOp;

impl BinaryTransform for AddOp {
    type Saved = ();

    fn forward(&mut self, a: &Tensor, b: &Tensor) -> GradResult<(Tensor, ())> {
        ensure_same_layout("add", a, b)?;
        let data = a.data().iter().zip(b.data().iter()).map(|(x, y)| x + y).collect();
        Ok((Tensor::new(a.shape().clone(), a.batch_count(), data)?, ()))
    }

    fn backward(&mut self, output_grad: &[f32], a: &Tensor, b: &Tensor, _: ()) -> GradResult<()> {
        a.accumulate_grad(output_grad)?;
        b.accumulate_grad(output_grad)
    }
}

/// Element-wise product of two tensors with the same layout
#[derive(Debug, Default)]
pub struct MulOp;

impl BinaryTransform for MulOp {
    type Saved = ();

    fn forward(&mut self, a: &Tensor, b: &Tensor) -> GradResult<(Tensor, ())> {
        ensure_same_layout("mul", a, b)?;
        let data = a.data().iter().zip(b.data().iter()).map(|(x, y)| x * y).collect();
        Ok((Tensor::new(a.shape().clone(), a.batch_count(), data)?, ()))
    }

    fn backward(&mut self, output_grad: &[f32], a: &Tensor, b: &Tensor, _: ()) -> GradResult<()> {
        // read both before writing, a and b may be the same tensor
        let da: Vec<f32> = output_grad.iter().zip(b.data().iter()).map(|(g, y)| g * y).collect();
        let db: Vec<f32> = output_grad.iter().zip(a.data().iter()).map(|(g, x)| g * x).collect();
        a.accumulate_grad(&da)?;
        b.accumulate_grad(&db)
    }
}

/// Per-sample concatenation; every input is flattened per sample
#[derive(Debug, Default)]
pub struct ConcatOp;

impl NaryTransform for ConcatOp {
    /// Per-sample width of each input
    type Saved = Vec<usize>;

    fn forward(&mut self, inputs: &[Tensor]) -> GradResult<(Tensor, Vec<usize>)> {
        let batch_count = inputs
            .first()
            .map(Tensor::batch_count)
            .ok_or_else(|| GradError::InvalidInput("concat needs at least one input".to_string()))?;
        if let Some(odd) = inputs.iter().find(|t| t.batch_count() != batch_count) {
            return Err(GradError::shape_error(
                &format!("batch count {}", batch_count),
                &format!("{}", odd.batch_count()),
                Some("Concatenated inputs must share a batch count"),
            ));
        }
        let widths: Vec<usize> = inputs.iter().map(Tensor::item_len).collect();
        let guards: Vec<_> = inputs.iter().map(Tensor::data).collect();
        let parts: Vec<(&[f32], usize)> = guards
            .iter()
            .zip(&widths)
            .map(|(guard, &width)| (&guard[..], width))
            .collect();
        let data = concat_samples(&parts, batch_count);
        let total: usize = widths.iter().sum();
        drop(parts);
        drop(guards);
        Ok((Tensor::new([total], batch_count, data)?, widths))
    }

    fn backward(&mut self, output_grad: &[f32], inputs: &[Tensor], widths: Vec<usize>) -> GradResult<()> {
        let batch_count = inputs.first().map(Tensor::batch_count).unwrap_or(0);
        let parts = split_samples(output_grad, &widths, batch_count)?;
        for (input, part) in inputs.iter().zip(&parts) {
            input.accumulate_grad(part)?;
        }
        Ok(())
    }
}

/// Split each sample into `chunks` equal consecutive pieces
#[derive(Debug)]
pub struct ChunkOp {
    chunks: usize,
}

impl ChunkOp {
    pub fn new(chunks: usize) -> GradResult<Self> {
        if chunks == 0 {
            return Err(GradError::InvalidInput("Chunk count must be positive".to_string()));
        }
        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }
}

impl SplitTransform for ChunkOp {
    type Saved = ();

    fn forward(&mut self, input: &Tensor) -> GradResult<(Vec<Tensor>, ())> {
        let width = input.item_len();
        if width % self.chunks != 0 {
            return Err(GradError::shape_error(
                &format!("a per-sample size divisible by {}", self.chunks),
                &format!("{}", width),
                None,
            ));
        }
        let piece = width / self.chunks;
        let widths = vec![piece; self.chunks];
        let parts = split_samples(&input.data(), &widths, input.batch_count())?;
        let outputs = parts
            .into_iter()
            .map(|data| Tensor::new([piece], input.batch_count(), data))
            .collect::<GradResult<Vec<_>>>()?;
        Ok((outputs, ()))
    }

    fn backward(&mut self, output_grads: &[Vec<f32>], input: &Tensor, _: ()) -> GradResult<()> {
        let piece = input.item_len() / self.chunks;
        let parts: Vec<(&[f32], usize)> = output_grads.iter().map(|g| (&g[..], piece)).collect();
        input.accumulate_grad(&concat_samples(&parts, input.batch_count()))
    }
}

pub type Add = Binary<AddOp>;
pub type Mul = Binary<MulOp>;
pub type Concat = Nary<ConcatOp>;
pub type Chunk = Split<ChunkOp>;

impl Add {
    pub fn add() -> Self {
        Binary::new(AddOp, OperatorConfig::new("add"))
    }
}

impl Mul {
    pub fn mul() -> Self {
        Binary::new(MulOp, OperatorConfig::new("mul"))
    }
}

impl Concat {
    pub fn concat() -> Self {
        Nary::new(ConcatOp, OperatorConfig::new("concat"))
    }
}

impl Chunk {
    pub fn chunk(chunks: usize) -> GradResult<Self> {
        Ok(Split::new(ChunkOp::new(chunks)?, OperatorConfig::new("chunk")))
    }
}

/// Per-sample shape produced by concatenating inputs of the given shapes
pub fn concat_shape(shapes: &[Shape]) -> Shape {
    Shape::from([shapes.iter().map(Shape::total_elements).sum::<usize>()])
}
