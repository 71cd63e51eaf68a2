//! Live tensor reporting for out-of-memory failures
//!
//! When a stage exhausts device memory the loss aggregator lists every
//! tensor it is holding for the failing call (input batch, resized copy,
//! routed context, running total) and passes the list to a
//! [`MemoryDiagnostics`] hook before returning the error.

use std::fmt;

use burn::prelude::*;
use burn::tensor::{BasicOps, DType};

use crate::context::{Context, ContextValue};

/// Type, shape and element type of a live tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorReport {
    /// What the tensor is within the failing call
    pub name: String,
    /// Rank and kind, e.g. `Tensor<4, Float>`
    pub kind: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorReport {
    pub fn of<B: Backend, const D: usize, K: BasicOps<B>>(
        name: impl Into<String>,
        tensor: &Tensor<B, D, K>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: format!("Tensor<{}, {}>", D, K::name()),
            shape: tensor.dims().to_vec(),
            dtype: tensor.dtype(),
        }
    }

    /// Element count
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

impl fmt::Display for TensorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {:?} {:?}",
            self.name, self.kind, self.shape, self.dtype
        )
    }
}

/// Receives the live tensor listing of a stage that ran out of memory
pub trait MemoryDiagnostics {
    fn report_live_tensors(&self, stage: usize, tensors: &[TensorReport]);
}

impl<F> MemoryDiagnostics for F
where
    F: Fn(usize, &[TensorReport]),
{
    fn report_live_tensors(&self, stage: usize, tensors: &[TensorReport]) {
        self(stage, tensors)
    }
}

/// Logs every live tensor at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl MemoryDiagnostics for TracingDiagnostics {
    fn report_live_tensors(&self, stage: usize, tensors: &[TensorReport]) {
        tracing::error!(
            stage,
            count = tensors.len(),
            "Stage ran out of device memory; live tensors follow"
        );
        for report in tensors {
            tracing::error!(stage, "{}", report);
        }
    }
}

/// Tensors held by the cascade during one stage call
#[derive(Debug, Default)]
pub(crate) struct LiveTensors {
    reports: Vec<TensorReport>,
}

impl LiveTensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track<B: Backend, const D: usize, K: BasicOps<B>>(
        &mut self,
        name: impl Into<String>,
        tensor: &Tensor<B, D, K>,
    ) -> &mut Self {
        self.reports.push(TensorReport::of(name, tensor));
        self
    }

    /// Tracks every tensor-valued entry of a context, in key order
    pub fn track_context<B: Backend>(&mut self, context: &Context<B>) -> &mut Self {
        for key in context.keys() {
            let name = format!("context[{key}]");
            match context.get(key) {
                Some(ContextValue::Image(t)) => {
                    self.track(name, t);
                }
                Some(ContextValue::Sequence(t)) => {
                    self.track(name, t);
                }
                Some(ContextValue::Features(t)) => {
                    self.track(name, t);
                }
                Some(ContextValue::Labels(t)) => {
                    self.track(name, t);
                }
                _ => {}
            }
        }
        self
    }

    pub fn reports(&self) -> &[TensorReport] {
        &self.reports
    }
}
