//! Kernel handles and the CPU/accelerated execution strategy

use std::fmt;
use std::sync::Arc;
use crate::error::{GradError, GradResult};
use super::device::Accelerator;

/// Computes output element `i` from the argument buffers
pub type ElementProgram = Arc<dyn Fn(usize, &[&[f32]]) -> f32 + Send + Sync>;

/// An element-wise program bound to an accelerator
#[derive(Clone)]
pub struct Kernel {
    name: String,
    arity: usize,
    program: ElementProgram,
    device: Arc<Accelerator>,
}

impl Kernel {
    pub(crate) fn new(name: &str, arity: usize, program: ElementProgram, device: Arc<Accelerator>) -> Self {
        Self {
            name: name.to_string(),
            arity,
            program,
            device,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Enqueue the program over `out` and wait for completion
    pub fn dispatch(&self, args: &[&[f32]], out: &mut [f32]) -> GradResult<()> {
        if args.len() != self.arity {
            return Err(GradError::accelerator_error(
                &self.name,
                &format!("expected {} argument buffers, got {}", self.arity, args.len()),
            ));
        }
        if let Some(pos) = args.iter().position(|a| a.is_empty()) {
            return Err(GradError::accelerator_error(
                &self.name,
                &format!("argument {} is empty", pos),
            ));
        }
        self.device.run(&self.program, args, out);
        Ok(())
    }

    /// Dispatch into a fresh buffer of `len` elements
    pub fn dispatch_new(&self, args: &[&[f32]], len: usize) -> GradResult<Vec<f32>> {
        let mut out = vec![0.0; len];
        self.dispatch(args, &mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Forward and backward kernels of one operator
#[derive(Debug, Clone)]
pub struct KernelPair {
    pub forward: Kernel,
    pub backward: Kernel,
}

/// How an operator's numeric body runs; chosen once per toggle
#[derive(Debug, Clone, Default)]
pub enum Execution {
    #[default]
    Cpu,
    Accelerated(KernelPair),
}

impl Execution {
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Execution::Accelerated(_))
    }

    pub fn kernels(&self) -> Option<&KernelPair> {
        match self {
            Execution::Cpu => None,
            Execution::Accelerated(pair) => Some(pair),
        }
    }
}
