//! Per-operator replay trace
//!
//! Every forward call pushes one [`TraceEntry`] holding the exact input
//! handles of that call and whatever auxiliary state its backward needs
//! (a dropout mask, a skip decision, the intermediate tensors of a
//! composite). The matching backward call pops it. Keeping inputs and
//! auxiliary state in one entry means they can never drift apart.

use crate::error::{GradError, GradResult};
use crate::tensor::Tensor;

/// State remembered by one forward call
#[derive(Debug)]
pub struct TraceEntry<A> {
    pub inputs: Vec<Tensor>,
    pub aux: A,
}

impl<A> TraceEntry<A> {
    pub fn new(inputs: Vec<Tensor>, aux: A) -> Self {
        Self { inputs, aux }
    }

    pub fn arity(&self) -> usize {
        self.inputs.len()
    }
}

/// LIFO of outstanding forward calls, optionally bounded
#[derive(Debug)]
pub struct Trace<A> {
    operator: String,
    entries: Vec<TraceEntry<A>>,
    bound: Option<usize>,
    pushes: usize,
    pops: usize,
}

impl<A> Trace<A> {
    pub fn new(operator: &str, bound: Option<usize>) -> Self {
        Self {
            operator: operator.to_string(),
            entries: Vec::new(),
            bound,
            pushes: 0,
            pops: 0,
        }
    }

    /// Fails when one more entry would exceed the bound
    pub fn check_capacity(&self) -> GradResult<()> {
        match self.bound {
            Some(bound) if self.entries.len() >= bound => Err(GradError::TraceOverflow {
                operator: self.operator.clone(),
                bound,
            }),
            _ => Ok(()),
        }
    }

    /// Remember one forward call
    pub fn push(&mut self, entry: TraceEntry<A>) -> GradResult<()> {
        self.check_capacity()?;
        self.entries.push(entry);
        self.pushes += 1;
        Ok(())
    }

    /// Take the most recent forward call
    pub fn pop(&mut self) -> GradResult<TraceEntry<A>> {
        let entry = self
            .entries
            .pop()
            .ok_or_else(|| GradError::EmptyTrace(self.operator.clone()))?;
        self.pops += 1;
        Ok(entry)
    }

    pub fn peek(&self) -> Option<&TraceEntry<A>> {
        self.entries.last()
    }

    /// Outstanding forward calls
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bound(&self) -> Option<usize> {
        self.bound
    }

    pub fn pushes(&self) -> usize {
        self.pushes
    }

    pub fn pops(&self) -> usize {
        self.pops
    }

    /// Drop every outstanding entry, e.g. after an aborted pass
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}
