//! Turns a flattened Caffe2 model into a [`Graph`] of typed operands and
//! operations, in a single forward pass.

mod args;
mod conv;
mod pool;
mod softmax;

use std::{str::FromStr, time::Instant};

use thiserror::Error;

use crate::{
    caffe2::{Caffe2Model, FlatOperator},
    graph::Graph,
    operand::{OperandCode, OperandId, OperandType, PerChannelQuantParams},
    operation::Operation,
    tensor::TensorData,
};

pub use args::conv_output_size;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Tensor '{0}' is not found")]
    UnresolvedTensorReference(String),

    #[error("Operator '{0}' is not supported")]
    UnsupportedOperator(String),

    #[error("Operator '{op}': group {group} is neither 1 nor the input depth {channels}")]
    UnsupportedGrouping { op: String, group: i32, channels: u32 },

    #[error("Operator '{op}': argument '{name}' is not specified")]
    MissingArgument { op: String, name: &'static str },

    #[error("Operator '{op}': argument '{name}' is invalid: {reason}")]
    InvalidArgument {
        op: String,
        name: &'static str,
        reason: String,
    },

    #[error("Operator '{op}': input #{index} is not specified")]
    MissingInput { op: String, index: usize },

    #[error("Tensor '{tensor}' has no '{field}' in the initializer net")]
    MissingTensorData { tensor: String, field: &'static str },

    #[error("Tensor '{tensor}' has an invalid shape: {reason}")]
    InvalidShape { tensor: String, reason: String },

    #[error("Operator '{op}': the window does not fit in the input")]
    InvalidOutputShape { op: String },

    #[error("Input size {0:?} is invalid")]
    InvalidInputSize(Vec<u32>),

    #[error("Model contains no operators")]
    EmptyModel,

    #[error("Tensor '{0}' is defined more than once")]
    DuplicateTensorName(String),

    #[error("Operand {0} already has a value")]
    DuplicateOperandValue(usize),

    #[error("Operand {0} does not exist")]
    UnknownOperand(usize),
}

/// What to do with `Softmax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftmaxPolicy {
    /// Emit nothing; the output name refers to the input operand. The caller
    /// is expected to apply softmax (if at all) on the output itself.
    #[default]
    Alias,
    /// Emit a `SOFTMAX` operation.
    Emit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    pub quantized: bool,
    pub signed_remap: bool,
    /// `[H, W, C]` (batch 1 is prepended) or a full `[N, H, W, C]`.
    pub input_size: Vec<u32>,
    pub softmax: SoftmaxPolicy,
}

impl BuildOptions {
    pub fn with_quantized(mut self, quantized: bool) -> Self {
        self.quantized = quantized;
        self
    }

    pub fn with_signed_remap(mut self, signed_remap: bool) -> Self {
        self.signed_remap = signed_remap;
        self
    }

    pub fn with_input_size(mut self, input_size: &[u32]) -> Self {
        self.input_size = input_size.to_vec();
        self
    }

    pub fn with_softmax(mut self, softmax: SoftmaxPolicy) -> Self {
        self.softmax = softmax;
        self
    }
}

/// The operator types the builder knows how to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caffe2Op {
    Int8Conv,
    Int8ConvRelu,
    Int8AveragePool,
    Softmax,
}

impl FromStr for Caffe2Op {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Int8Conv" => Ok(Self::Int8Conv),
            "Int8ConvRelu" => Ok(Self::Int8ConvRelu),
            "Int8AveragePool" => Ok(Self::Int8AveragePool),
            "Softmax" => Ok(Self::Softmax),
            op => Err(BuildError::UnsupportedOperator(op.to_owned())),
        }
    }
}

/// Builds one graph. Consumed by [`GraphBuilder::build`]; a failed build
/// leaves nothing behind to reuse.
pub struct GraphBuilder {
    opts: BuildOptions,
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(opts: BuildOptions) -> Self {
        Self {
            opts,
            graph: Graph::default(),
        }
    }

    pub fn build(mut self, model: &Caffe2Model) -> Result<Graph, BuildError> {
        let start = Instant::now();

        let first = model.ops.first().ok_or(BuildError::EmptyModel)?;
        let input = self.add_input(first)?;

        for (index, op) in model.ops.iter().enumerate() {
            log::debug!("layer{index}: {} ({})", op.op_type, op.name);
            match op.op_type.parse::<Caffe2Op>()? {
                Caffe2Op::Int8Conv | Caffe2Op::Int8ConvRelu => self.add_conv(op)?,
                Caffe2Op::Int8AveragePool => self.add_average_pool(op)?,
                Caffe2Op::Softmax => self.add_softmax(op)?,
            }
        }

        let last = model.ops.last().ok_or(BuildError::EmptyModel)?;
        let output_name = output_name(last, 0)?;
        let output = self.tensor_id(output_name)?;

        self.graph.inputs = vec![input];
        self.graph.outputs = vec![output];
        self.graph.validate()?;

        log::info!("build_graph: {:?}", start.elapsed());

        Ok(self.graph)
    }

    /// Declares the model input, typed from the first operator's `X_scale`
    /// and `X_zero_point` when quantized.
    fn add_input(&mut self, first: &FlatOperator) -> Result<OperandId, BuildError> {
        let name = input_record(first, 0)?.name.clone();

        let dims = match self.opts.input_size.as_slice() {
            dims if dims.contains(&0) => return Err(BuildError::InvalidInputSize(dims.to_vec())),
            &[h, w, c] => vec![1, h, w, c],
            dims @ [_, _, _, _] => dims.to_vec(),
            dims => return Err(BuildError::InvalidInputSize(dims.to_vec())),
        };

        let ty = if self.opts.quantized {
            let scale = args::required_f32(first, "X_scale")?;
            let zero_point = if self.opts.signed_remap {
                0
            } else {
                args::required_i32(first, "X_zero_point")?
            };
            OperandType::new(self.quant8_code(), dims).with_quant(scale, zero_point)
        } else {
            OperandType::new(OperandCode::TensorFloat32, dims)
        };

        log::debug!("input {name:?}: {ty}");
        self.add_tensor(&name, ty, None)
    }

    fn quant8_code(&self) -> OperandCode {
        if self.opts.signed_remap {
            OperandCode::TensorQuant8AsymmSigned
        } else {
            OperandCode::TensorQuant8Asymm
        }
    }

    /// Creates an operand, binds `value` to it if given, and registers it
    /// under `name`.
    fn add_tensor(
        &mut self,
        name: &str,
        ty: OperandType,
        value: Option<TensorData>,
    ) -> Result<OperandId, BuildError> {
        if self.graph.tensor_ids.contains_key(name) {
            return Err(BuildError::DuplicateTensorName(name.to_owned()));
        }
        let id = self.graph.operands.new_operand_named(name, ty);
        if let Some(value) = value {
            self.set_operand_value(id, value)?;
        }
        self.graph.tensor_ids.insert(name.to_owned(), id);
        Ok(id)
    }

    fn add_operand(
        &mut self,
        ty: OperandType,
        value: Option<TensorData>,
    ) -> Result<OperandId, BuildError> {
        let id = self.graph.operands.new_operand(ty);
        if let Some(value) = value {
            self.set_operand_value(id, value)?;
        }
        Ok(id)
    }

    fn add_arg_i32(&mut self, value: i32) -> Result<OperandId, BuildError> {
        self.add_operand(
            OperandType::scalar(OperandCode::Int32),
            Some(TensorData::I32(vec![value])),
        )
    }

    fn add_arg_f32(&mut self, value: f32) -> Result<OperandId, BuildError> {
        self.add_operand(
            OperandType::scalar(OperandCode::Float32),
            Some(TensorData::F32(vec![value])),
        )
    }

    fn set_operand_value(&mut self, id: OperandId, value: TensorData) -> Result<(), BuildError> {
        let operand = self
            .graph
            .operands
            .get(id)
            .ok_or(BuildError::UnknownOperand(id.index()))?;
        if operand.ty.total_elems() != value.len() {
            return Err(BuildError::InvalidShape {
                tensor: operand.name.clone().unwrap_or_else(|| format!("%{}", id.index())),
                reason: format!(
                    "{} values for dimensions {:?}",
                    value.len(),
                    operand.ty.dimensions
                ),
            });
        }
        if self.graph.values.contains_key(&id) {
            return Err(BuildError::DuplicateOperandValue(id.index()));
        }
        self.graph.values.insert(id, value);
        Ok(())
    }

    fn set_quant_params(
        &mut self,
        id: OperandId,
        params: PerChannelQuantParams,
    ) -> Result<(), BuildError> {
        if !self.graph.operands.contains(id) {
            return Err(BuildError::UnknownOperand(id.index()));
        }
        if self.graph.quant_params.contains_key(&id) {
            return Err(BuildError::DuplicateOperandValue(id.index()));
        }
        self.graph.quant_params.insert(id, params);
        Ok(())
    }

    fn add_operation(&mut self, op: Operation) -> Result<(), BuildError> {
        if let Some(id) = op
            .inputs
            .iter()
            .chain(op.outputs.iter())
            .find(|&&id| !self.graph.operands.contains(id))
        {
            return Err(BuildError::UnknownOperand(id.index()));
        }
        log::debug!("  {op}");
        self.graph.required_ops.insert(op.code);
        self.graph.operations.push(op);
        Ok(())
    }

    /// Makes `name` refer to the existing operand `id`.
    fn alias(&mut self, name: &str, id: OperandId) -> Result<(), BuildError> {
        if self.graph.tensor_ids.contains_key(name) {
            return Err(BuildError::DuplicateTensorName(name.to_owned()));
        }
        self.graph.tensor_ids.insert(name.to_owned(), id);
        Ok(())
    }

    fn tensor_id(&self, name: &str) -> Result<OperandId, BuildError> {
        self.graph
            .tensor_id(name)
            .ok_or_else(|| BuildError::UnresolvedTensorReference(name.to_owned()))
    }

    fn tensor_type(&self, name: &str) -> Result<&OperandType, BuildError> {
        let id = self.tensor_id(name)?;
        Ok(&self.graph.operands[id].ty)
    }
}

fn input_record(op: &FlatOperator, index: usize) -> Result<&crate::caffe2::TensorRecord, BuildError> {
    op.inputs.get(index).ok_or_else(|| BuildError::MissingInput {
        op: op.name.clone(),
        index,
    })
}

fn output_name(op: &FlatOperator, index: usize) -> Result<&str, BuildError> {
    op.output_name(index).ok_or_else(|| BuildError::MissingInput {
        op: op.name.clone(),
        index,
    })
}

/// Unpacks `[N, H, W, C]`.
fn nhwc(tensor: &str, dims: &[u32]) -> Result<[u32; 4], BuildError> {
    match *dims {
        [n, h, w, c] => Ok([n, h, w, c]),
        _ => Err(BuildError::InvalidShape {
            tensor: tensor.to_owned(),
            reason: format!("expected 4 dimensions, got {dims:?}"),
        }),
    }
}
