use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use crate::error::{GradError, GradResult};

/// Value and gradient buffers of one tensor.
///
/// The gradient is allocated on first contribution and only ever grows by
/// accumulation, except for loss seeding which overwrites it. `pending`
/// tracks whether a contribution arrived since the last time the gradient
/// was consumed by an update.
#[derive(Debug)]
pub struct TensorStorage {
    data: RwLock<Vec<f32>>,
    grad: RwLock<Option<Vec<f32>>>,
    pending: AtomicBool,
}

impl TensorStorage {
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data: RwLock::new(data),
            grad: RwLock::new(None),
            pending: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.data.write()
    }

    pub fn grad(&self) -> Option<Vec<f32>> {
        self.grad.read().clone()
    }

    pub fn has_grad(&self) -> bool {
        self.grad.read().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Run `f` on the gradient buffer, allocating it zeroed if needed.
    pub fn accumulate_with<F>(&self, len: usize, f: F)
    where
        F: FnOnce(&mut [f32]),
    {
        let mut guard = self.grad.write();
        let grad = guard.get_or_insert_with(|| vec![0.0; len]);
        f(grad.as_mut_slice());
        self.pending.store(true, Ordering::Release);
    }

    pub fn accumulate(&self, contribution: &[f32]) -> GradResult<()> {
        let len = self.len();
        if contribution.len() != len {
            return Err(GradError::shape_error(
                &format!("{} gradient elements", len),
                &format!("{}", contribution.len()),
                None,
            ));
        }
        self.accumulate_with(len, |grad| {
            for (g, &c) in grad.iter_mut().zip(contribution) {
                *g += c;
            }
        });
        Ok(())
    }

    pub fn overwrite_grad(&self, seed: Vec<f32>) -> GradResult<()> {
        let len = self.len();
        if seed.len() != len {
            return Err(GradError::shape_error(
                &format!("{} gradient elements", len),
                &format!("{}", seed.len()),
                None,
            ));
        }
        *self.grad.write() = Some(seed);
        self.pending.store(true, Ordering::Release);
        Ok(())
    }

    /// Zero the gradient in place, keeping the allocation.
    pub fn zero_grad(&self) {
        if let Some(grad) = self.grad.write().as_mut() {
            grad.iter_mut().for_each(|g| *g = 0.0);
        }
        self.pending.store(false, Ordering::Release);
    }

    /// Drop the gradient buffer entirely.
    pub fn clear_grad(&self) {
        *self.grad.write() = None;
        self.pending.store(false, Ordering::Release);
    }
}

impl Clone for TensorStorage {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
            grad: RwLock::new(self.grad.read().clone()),
            pending: AtomicBool::new(self.is_pending()),
        }
    }
}
