//! Core tensor types and use-count bookkeeping

use std::{
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::autograd::OperatorMeta;
use crate::error::{GradError, GradResult};
use super::storage::TensorStorage;

/// Per-sample shape; the batch dimension is kept separately on the tensor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn total_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_valid(&self) -> bool {
        self.dims.iter().all(|&d| d > 0)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.dims.iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", "))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

/// Process-unique tensor identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u64);

impl TensorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TensorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

const NO_LIMIT: usize = usize::MAX;

struct TensorInner {
    id: TensorId,
    shape: Shape,
    batch_count: usize,
    storage: TensorStorage,
    use_count: AtomicUsize,
    baseline: AtomicUsize,
    use_limit: AtomicUsize,
    producer: RwLock<Option<Weak<OperatorMeta>>>,
}

/// Shared handle to a batched `f32` buffer with a lazily allocated gradient.
///
/// Cloning the handle is cheap and never copies data; every clone observes
/// the same buffers, use-count and producer. Use [`Tensor::deep_clone`] for
/// an independent copy.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Tensor {
    /// Create a tensor from a flat buffer holding `batch_count` samples
    pub fn new(shape: impl Into<Shape>, batch_count: usize, data: Vec<f32>) -> GradResult<Self> {
        let shape = shape.into();
        let expected = batch_count * shape.total_elements();
        if data.len() != expected {
            return Err(GradError::shape_error(
                &format!("{} elements for {} x {}", expected, batch_count, shape),
                &format!("{} elements", data.len()),
                Some("Buffer length must equal batch_count times the per-sample element count"),
            ));
        }
        Ok(Self::from_parts(shape, batch_count, data))
    }

    fn from_parts(shape: Shape, batch_count: usize, data: Vec<f32>) -> Self {
        Self {
            inner: Arc::new(TensorInner {
                id: TensorId::next(),
                shape,
                batch_count,
                storage: TensorStorage::new(data),
                use_count: AtomicUsize::new(0),
                baseline: AtomicUsize::new(0),
                use_limit: AtomicUsize::new(NO_LIMIT),
                producer: RwLock::new(None),
            }),
        }
    }

    /// Single-sample tensor
    pub fn from_vec(data: Vec<f32>, shape: impl Into<Shape>) -> GradResult<Self> {
        Self::new(shape, 1, data)
    }

    pub fn full(shape: impl Into<Shape>, batch_count: usize, value: f32) -> Self {
        let shape = shape.into();
        let len = batch_count * shape.total_elements();
        Self::from_parts(shape, batch_count, vec![value; len])
    }

    pub fn zeros(shape: impl Into<Shape>, batch_count: usize) -> Self {
        Self::full(shape, batch_count, 0.0)
    }

    pub fn ones(shape: impl Into<Shape>, batch_count: usize) -> Self {
        Self::full(shape, batch_count, 1.0)
    }

    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(other.shape().clone(), other.batch_count())
    }

    /// Uniform samples in `[low, high)` drawn from a caller-supplied generator
    pub fn uniform<R: Rng>(
        shape: impl Into<Shape>,
        batch_count: usize,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Self {
        let shape = shape.into();
        let len = batch_count * shape.total_elements();
        let data = (0..len).map(|_| rng.gen_range(low..high)).collect();
        Self::from_parts(shape, batch_count, data)
    }

    /// Independent copy of data and gradient with fresh identity and counters
    pub fn deep_clone(&self) -> Self {
        Self {
            inner: Arc::new(TensorInner {
                id: TensorId::next(),
                shape: self.inner.shape.clone(),
                batch_count: self.inner.batch_count,
                storage: self.inner.storage.clone(),
                use_count: AtomicUsize::new(0),
                baseline: AtomicUsize::new(0),
                use_limit: AtomicUsize::new(NO_LIMIT),
                producer: RwLock::new(None),
            }),
        }
    }

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn batch_count(&self) -> usize {
        self.inner.batch_count
    }

    /// Elements per sample
    pub fn item_len(&self) -> usize {
        self.inner.shape.total_elements()
    }

    /// Elements across the whole batch
    pub fn len(&self) -> usize {
        self.inner.batch_count * self.item_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.inner.storage.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.inner.storage.write()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data().clone()
    }

    /// Samples `index` of the batch, copied
    pub fn item(&self, index: usize) -> GradResult<Vec<f32>> {
        if index >= self.batch_count() {
            return Err(GradError::InvalidInput(format!(
                "Batch index {} out of range for {} samples",
                index,
                self.batch_count()
            )));
        }
        let width = self.item_len();
        Ok(self.data()[index * width..(index + 1) * width].to_vec())
    }

    pub fn grad(&self) -> Option<Vec<f32>> {
        self.inner.storage.grad()
    }

    /// The accumulated gradient, or zeros when nothing was deposited yet
    pub fn grad_or_zeros(&self) -> Vec<f32> {
        self.grad().unwrap_or_else(|| vec![0.0; self.len()])
    }

    pub fn has_grad(&self) -> bool {
        self.inner.storage.has_grad()
    }

    /// True when a contribution arrived since the gradient was last consumed
    pub fn has_pending_grad(&self) -> bool {
        self.inner.storage.is_pending()
    }

    pub fn accumulate_grad(&self, contribution: &[f32]) -> GradResult<()> {
        self.inner.storage.accumulate(contribution)
    }

    /// Accumulate in place through a closure over the (lazily zeroed) gradient
    pub fn accumulate_grad_with<F>(&self, f: F)
    where
        F: FnOnce(&mut [f32]),
    {
        self.inner.storage.accumulate_with(self.len(), f)
    }

    /// Overwrite the gradient; used to seed the start of a backward pass
    pub fn set_grad(&self, seed: Vec<f32>) -> GradResult<()> {
        self.inner.storage.overwrite_grad(seed)
    }

    pub fn zero_grad(&self) {
        self.inner.storage.zero_grad()
    }

    pub fn clear_grad(&self) {
        self.inner.storage.clear_grad()
    }

    /// Declare a static upper bound on concurrent consumers
    pub fn with_use_limit(self, limit: usize) -> Self {
        self.inner.use_limit.store(limit, Ordering::Release);
        self
    }

    pub fn use_limit(&self) -> Option<usize> {
        match self.inner.use_limit.load(Ordering::Acquire) {
            NO_LIMIT => None,
            limit => Some(limit),
        }
    }

    pub fn use_count(&self) -> usize {
        self.inner.use_count.load(Ordering::Acquire)
    }

    /// Register one more forward consumer of this tensor
    pub fn record_use(&self) -> GradResult<()> {
        let limit = self.inner.use_limit.load(Ordering::Acquire);
        let previous = self
            .inner
            .use_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count >= limit {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .map_err(|_| GradError::UseLimitExceeded {
                tensor: self.id().0,
                limit,
            })?;
        tracing::trace!(tensor = %self.id(), use_count = previous + 1, "recorded use");
        Ok(())
    }

    /// Register that one consumer deposited its gradient share
    pub fn record_consumed(&self) -> GradResult<()> {
        let previous = self
            .inner
            .use_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map_err(|_| {
                GradError::InvalidState(format!(
                    "tensor {} consumed more often than it was used",
                    self.id()
                ))
            })?;
        tracing::trace!(tensor = %self.id(), use_count = previous - 1, "recorded consumption");
        Ok(())
    }

    /// Snapshot the current use-count as the baseline of a new pass
    pub fn mark_pass_start(&self) {
        let current = self.use_count();
        self.inner.baseline.store(current, Ordering::Release);
    }

    pub fn baseline(&self) -> usize {
        self.inner.baseline.load(Ordering::Acquire)
    }

    /// Every consumer of this pass has contributed and an unconsumed
    /// contribution is waiting.
    pub fn is_gradient_complete(&self) -> bool {
        self.use_count() == self.baseline() && self.has_pending_grad()
    }

    pub fn producer(&self) -> Option<Arc<OperatorMeta>> {
        self.inner.producer.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn has_producer(&self) -> bool {
        self.inner.producer.read().is_some()
    }

    pub(crate) fn set_producer(&self, meta: &Arc<OperatorMeta>) {
        *self.inner.producer.write() = Some(Arc::downgrade(meta));
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Tensor {}

impl Hash for Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.inner.id)
            .field("shape", &self.inner.shape)
            .field("batch_count", &self.inner.batch_count)
            .field("use_count", &self.use_count())
            .field("has_grad", &self.has_grad())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_shape_creation() {
        let shape = Shape::new(vec![2, 3, 4]);
        assert_eq!(shape.total_elements(), 24);
        assert!(shape.is_valid());
        assert_eq!(shape.to_string(), "[2, 3, 4]");
        assert_eq!(Shape::scalar().total_elements(), 1);
        assert!(!Shape::from([2, 0]).is_valid());
    }

    #[test]
    fn test_tensor_creation_checks_length() {
        let tensor = Tensor::new([3], 2, vec![1.0; 6]).unwrap();
        assert_eq!(tensor.len(), 6);
        assert_eq!(tensor.item_len(), 3);
        assert_eq!(tensor.batch_count(), 2);

        assert!(matches!(Tensor::new([3], 2, vec![1.0; 5]), Err(GradError::ShapeError(_))));
    }

    #[test]
    fn test_handles_share_buffers() {
        let a = Tensor::zeros([2], 1);
        let b = a.clone();
        b.data_mut()[1] = 5.0;
        assert_eq!(a.to_vec(), vec![0.0, 5.0]);
        assert_eq!(a, b);

        let c = a.deep_clone();
        assert_ne!(a, c);
        c.data_mut()[0] = 1.0;
        assert_eq!(a.to_vec(), vec![0.0, 5.0]);
    }

    #[test]
    fn test_item_slices_one_sample() {
        let tensor = Tensor::new([2], 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(tensor.item(1).unwrap(), vec![2.0, 3.0]);
        assert!(tensor.item(3).is_err());
    }

    #[test]
    fn test_use_count_gates_completion() {
        let weight = Tensor::ones([2], 1);
        assert!(!weight.is_gradient_complete());

        weight.record_use().unwrap();
        weight.record_use().unwrap();
        weight.accumulate_grad(&[1.0, 1.0]).unwrap();
        weight.record_consumed().unwrap();
        assert_eq!(weight.use_count(), 1);
        assert!(!weight.is_gradient_complete());

        weight.accumulate_grad(&[1.0, 1.0]).unwrap();
        weight.record_consumed().unwrap();
        assert_eq!(weight.use_count(), 0);
        assert!(weight.is_gradient_complete());
        assert_eq!(weight.grad(), Some(vec![2.0, 2.0]));
    }

    #[test]
    fn test_consumed_below_zero_is_an_error() {
        let tensor = Tensor::zeros([1], 1);
        assert!(matches!(tensor.record_consumed(), Err(GradError::InvalidState(_))));
        assert_eq!(tensor.use_count(), 0);
    }

    #[test]
    fn test_baseline_shifts_completion_point() {
        let tensor = Tensor::zeros([1], 1);
        tensor.record_use().unwrap();
        tensor.mark_pass_start();

        tensor.record_use().unwrap();
        tensor.accumulate_grad(&[1.0]).unwrap();
        assert!(!tensor.is_gradient_complete());
        tensor.record_consumed().unwrap();
        assert!(tensor.is_gradient_complete());
    }

    #[test]
    fn test_use_limit() {
        let tensor = Tensor::zeros([1], 1).with_use_limit(2);
        assert_eq!(tensor.use_limit(), Some(2));
        tensor.record_use().unwrap();
        tensor.record_use().unwrap();
        assert!(matches!(
            tensor.record_use(),
            Err(GradError::UseLimitExceeded { limit: 2, .. })
        ));
        assert_eq!(tensor.use_count(), 2);
    }

    #[test]
    fn test_uniform_is_reproducible() {
        let a = Tensor::uniform([4], 1, -1.0, 1.0, &mut StdRng::seed_from_u64(3));
        let b = Tensor::uniform([4], 1, -1.0, 1.0, &mut StdRng::seed_from_u64(3));
        assert_eq!(a.to_vec(), b.to_vec());
        assert!(a.to_vec().iter().all(|v| (-1.0..1.0).contains(v)));
    }
}
