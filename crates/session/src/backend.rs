//! The contract an execution backend implements to receive a graph.
//!
//! Operands are numbered by the backend in `add_operand` call order.
//! A model is populated, `finish`ed, compiled, and then executed any number
//! of times.

use std::borrow::Cow;

use nnimport_core::{
    operand::{OperandType, PerChannelQuantParams},
    operation::OperationCode,
    tensor::TensorData,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Operand {0} does not exist")]
    UnknownOperand(u32),

    #[error("Operand {index}: {reason}")]
    InvalidOperand { index: u32, reason: String },

    #[error("Operation {0} is not supported")]
    UnsupportedOperation(OperationCode),

    #[error("Model is already finished")]
    AlreadyFinished,

    #[error("Model or compilation is not finished")]
    NotFinished,

    #[error("No input/output #{0}")]
    BadIndex(u32),

    #[error("{0}")]
    Message(Cow<'static, str>),
}

/// Execution preference handed to the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum PreferenceCode {
    LowPower = 0,
    #[default]
    FastSingleAnswer = 1,
    SustainedSpeed = 2,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOptions {
    /// Execute operations one by one as they are added.
    pub eager: bool,
    /// Operations the backend may run. Empty means no restriction.
    pub supported_ops: Vec<OperationCode>,
}

pub trait Backend {
    type Model: Model;

    fn create_model(&self, opts: &ModelOptions) -> Result<Self::Model, BackendError>;
}

pub trait Model {
    type Compilation: Compilation;

    /// Returns the index of the new operand.
    fn add_operand(&mut self, ty: &OperandType) -> Result<u32, BackendError>;

    fn set_operand_value(&mut self, index: u32, value: &TensorData) -> Result<(), BackendError>;

    fn set_operand_symm_per_channel_quant_params(
        &mut self,
        index: u32,
        params: &PerChannelQuantParams,
    ) -> Result<(), BackendError>;

    fn add_operation(
        &mut self,
        code: OperationCode,
        inputs: &[u32],
        outputs: &[u32],
    ) -> Result<(), BackendError>;

    fn identify_inputs_and_outputs(
        &mut self,
        inputs: &[u32],
        outputs: &[u32],
    ) -> Result<(), BackendError>;

    fn finish(&mut self) -> Result<(), BackendError>;

    fn create_compilation(&self) -> Result<Self::Compilation, BackendError>;
}

pub trait Compilation {
    type Execution: Execution;

    fn set_preference(&mut self, preference: PreferenceCode) -> Result<(), BackendError>;

    fn finish(&mut self) -> Result<(), BackendError>;

    fn create_execution(&self) -> Result<Self::Execution, BackendError>;
}

pub trait Execution {
    /// Copies `data` in as the model's `index`-th input.
    fn set_input(&mut self, index: u32, data: &TensorData) -> Result<(), BackendError>;

    /// Declares the buffer the `index`-th output is written to; its element
    /// type and length must match the output operand.
    fn set_output(&mut self, index: u32, buffer: &TensorData) -> Result<(), BackendError>;

    fn start_compute(&mut self) -> Result<(), BackendError>;

    /// The `index`-th output of the last computation.
    fn output(&self, index: u32) -> Option<&TensorData>;
}
