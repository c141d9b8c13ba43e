//! Blocking offload device backed by a dedicated thread pool

use std::sync::Arc;
use lazy_static::lazy_static;
use crate::{
    config,
    error::{GradError, GradResult},
};
use super::kernel::{ElementProgram, Kernel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelBackend {
    /// Data-parallel execution on a private rayon pool
    ThreadPool,
    /// Sequential execution on the calling thread; used when the `accel`
    /// feature is compiled out
    Inline,
}

impl AccelBackend {
    pub fn is_parallel(&self) -> bool {
        matches!(self, AccelBackend::ThreadPool)
    }
}

/// Accelerator context; every dispatch blocks until all elements are written
pub struct Accelerator {
    backend: AccelBackend,
    #[cfg(feature = "accel")]
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerator")
            .field("backend", &self.backend)
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

impl Accelerator {
    #[cfg(feature = "accel")]
    pub fn new(num_threads: usize) -> GradResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("stackgrad-accel-{}", i))
            .build()
            .map_err(|e| GradError::accelerator_error("<pool>", &e.to_string()))?;
        tracing::info!(threads = pool.current_num_threads(), "accelerator pool started");
        Ok(Self {
            backend: AccelBackend::ThreadPool,
            pool,
        })
    }

    #[cfg(not(feature = "accel"))]
    pub fn new(_num_threads: usize) -> GradResult<Self> {
        Ok(Self {
            backend: AccelBackend::Inline,
        })
    }

    /// The process-wide accelerator, or `None` when acceleration is compiled
    /// out, disabled by configuration, or failed to start.
    pub fn global() -> Option<Arc<Accelerator>> {
        if !cfg!(feature = "accel") || !config::get_config().acceleration.enabled {
            return None;
        }
        GLOBAL_ACCELERATOR.clone()
    }

    pub fn backend(&self) -> AccelBackend {
        self.backend
    }

    pub fn num_threads(&self) -> usize {
        #[cfg(feature = "accel")]
        {
            self.pool.current_num_threads()
        }
        #[cfg(not(feature = "accel"))]
        {
            1
        }
    }

    /// Bind an element program to `device`; a program must read at least
    /// one argument buffer
    pub fn compile(
        device: &Arc<Accelerator>,
        name: &str,
        arity: usize,
        program: ElementProgram,
    ) -> GradResult<Kernel> {
        if arity == 0 {
            return Err(GradError::accelerator_error(name, "kernel takes no argument buffers"));
        }
        tracing::debug!(kernel = name, arity, "compiled kernel");
        Ok(Kernel::new(name, arity, program, Arc::clone(device)))
    }

    pub(crate) fn run(&self, program: &ElementProgram, args: &[&[f32]], out: &mut [f32]) {
        #[cfg(feature = "accel")]
        {
            use rayon::prelude::*;
            self.pool.install(|| {
                out.par_iter_mut()
                    .enumerate()
                    .for_each(|(i, o)| *o = (program.as_ref())(i, args));
            });
        }
        #[cfg(not(feature = "accel"))]
        {
            for (i, o) in out.iter_mut().enumerate() {
                *o = (program.as_ref())(i, args);
            }
        }
    }
}

lazy_static! {
    static ref GLOBAL_ACCELERATOR: Option<Arc<Accelerator>> = {
        let threads = config::get_config().acceleration.num_threads;
        match Accelerator::new(threads) {
            Ok(device) => Some(Arc::new(device)),
            Err(e) => {
                tracing::warn!("accelerator unavailable: {}", e);
                None
            }
        }
    };
}
