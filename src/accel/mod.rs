//! Accelerated execution: synchronous offload of element-wise kernels

pub mod device;
pub mod kernel;

pub use device::{AccelBackend, Accelerator};
pub use kernel::{ElementProgram, Execution, Kernel, KernelPair};

use std::sync::Arc;
use crate::error::GradResult;

/// Check if an accelerator can be used right now
pub fn is_available() -> bool {
    Accelerator::global().is_some()
}

/// Capability switch for operators with an accelerated code path.
///
/// After every toggle the implementor rebinds its kernels through
/// [`Accelerate::create_kernels`].
pub trait Accelerate {
    /// Request acceleration on or off; returns the state actually in effect,
    /// which is forced off when no accelerator is available.
    fn set_acceleration_enabled(&mut self, enabled: bool) -> bool;

    /// (Re)bind the forward/backward kernel pair for the current state
    fn create_kernels(&mut self) -> GradResult<()>;

    fn acceleration_enabled(&self) -> bool;
}

/// Pick the execution strategy for `operator`.
///
/// Returns [`Execution::Cpu`] when acceleration was not requested or no
/// accelerator is available; `build` compiles the kernel pair otherwise and
/// its failure is passed through.
pub fn select_execution<F>(operator: &str, requested: bool, build: F) -> GradResult<Execution>
where
    F: FnOnce(&Arc<Accelerator>) -> GradResult<KernelPair>,
{
    if !requested {
        return Ok(Execution::Cpu);
    }
    match Accelerator::global() {
        Some(device) => {
            let pair = build(&device)?;
            tracing::debug!(operator, "bound accelerated kernels");
            Ok(Execution::Accelerated(pair))
        }
        None => {
            tracing::warn!(operator, "acceleration requested but unavailable, using CPU");
            Ok(Execution::Cpu)
        }
    }
}
