//! A backend that checks and records every call it receives. Computation
//! yields zero-filled outputs; no tensor math is performed.

use std::{cell::RefCell, rc::Rc};

use nnimport_core::{
    operand::{OperandCode, OperandType, PerChannelQuantParams},
    operation::OperationCode,
    tensor::{TensorData, TensorElemType},
};
use rustc_hash::FxHashSet;

use crate::backend::{
    Backend, BackendError, Compilation, Execution, Model, ModelOptions, PreferenceCode,
};

type CallLog = Rc<RefCell<Vec<String>>>;

#[derive(Debug, Default, Clone)]
pub struct TraceBackend {
    calls: CallLog,
}

impl TraceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far, one line each.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Backend for TraceBackend {
    type Model = TraceModel;

    fn create_model(&self, opts: &ModelOptions) -> Result<Self::Model, BackendError> {
        record(
            &self.calls,
            format!(
                "create_model eager={} supported_ops={:?}",
                opts.eager, opts.supported_ops
            ),
        );
        Ok(TraceModel {
            calls: self.calls.clone(),
            supported_ops: opts.supported_ops.iter().copied().collect(),
            operands: Vec::new(),
            has_value: FxHashSet::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            finished: false,
        })
    }
}

pub struct TraceModel {
    calls: CallLog,
    supported_ops: FxHashSet<OperationCode>,
    operands: Vec<OperandType>,
    has_value: FxHashSet<u32>,
    inputs: Vec<u32>,
    outputs: Vec<u32>,
    finished: bool,
}

impl TraceModel {
    fn operand(&self, index: u32) -> Result<&OperandType, BackendError> {
        self.operands
            .get(index as usize)
            .ok_or(BackendError::UnknownOperand(index))
    }

    fn check_unfinished(&self) -> Result<(), BackendError> {
        if self.finished {
            Err(BackendError::AlreadyFinished)
        } else {
            Ok(())
        }
    }
}

impl Model for TraceModel {
    type Compilation = TraceCompilation;

    fn add_operand(&mut self, ty: &OperandType) -> Result<u32, BackendError> {
        self.check_unfinished()?;
        let index = self.operands.len() as u32;
        self.operands.push(ty.clone());
        record(&self.calls, format!("add_operand {ty} -> {index}"));
        Ok(index)
    }

    fn set_operand_value(&mut self, index: u32, value: &TensorData) -> Result<(), BackendError> {
        self.check_unfinished()?;
        let ty = self.operand(index)?;
        if !accepts(ty.code, value.elem_ty()) {
            return Err(invalid(
                index,
                format!("{} value for {}", value.elem_ty(), ty.code.name()),
            ));
        }
        if value.len() != ty.total_elems() {
            return Err(invalid(
                index,
                format!("{} values for {:?}", value.len(), ty.dimensions),
            ));
        }
        if !self.has_value.insert(index) {
            return Err(invalid(index, "value is already set".into()));
        }
        record(&self.calls, format!("set_operand_value {index} {value}"));
        Ok(())
    }

    fn set_operand_symm_per_channel_quant_params(
        &mut self,
        index: u32,
        params: &PerChannelQuantParams,
    ) -> Result<(), BackendError> {
        self.check_unfinished()?;
        let ty = self.operand(index)?;
        if ty.code != OperandCode::TensorQuant8SymmPerChannel {
            return Err(invalid(
                index,
                format!("{} is not per-channel quantized", ty.code.name()),
            ));
        }
        match ty.dimensions.get(params.channel_dim as usize) {
            Some(&channels) if channels as usize == params.scales.len() => {}
            _ => {
                return Err(invalid(
                    index,
                    format!(
                        "{} scales along dimension {} of {:?}",
                        params.scales.len(),
                        params.channel_dim,
                        ty.dimensions
                    ),
                ))
            }
        }
        record(
            &self.calls,
            format!(
                "set_operand_symm_per_channel_quant_params {index} dim={} scales={:?}",
                params.channel_dim, params.scales
            ),
        );
        Ok(())
    }

    fn add_operation(
        &mut self,
        code: OperationCode,
        inputs: &[u32],
        outputs: &[u32],
    ) -> Result<(), BackendError> {
        self.check_unfinished()?;
        if !self.supported_ops.is_empty() && !self.supported_ops.contains(&code) {
            return Err(BackendError::UnsupportedOperation(code));
        }
        for &index in inputs.iter().chain(outputs) {
            self.operand(index)?;
        }
        record(
            &self.calls,
            format!("add_operation {code} {inputs:?} -> {outputs:?}"),
        );
        Ok(())
    }

    fn identify_inputs_and_outputs(
        &mut self,
        inputs: &[u32],
        outputs: &[u32],
    ) -> Result<(), BackendError> {
        self.check_unfinished()?;
        for &index in inputs.iter().chain(outputs) {
            self.operand(index)?;
        }
        self.inputs = inputs.to_vec();
        self.outputs = outputs.to_vec();
        record(
            &self.calls,
            format!("identify_inputs_and_outputs {inputs:?} -> {outputs:?}"),
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        self.check_unfinished()?;
        self.finished = true;
        record(&self.calls, "finish".into());
        Ok(())
    }

    fn create_compilation(&self) -> Result<Self::Compilation, BackendError> {
        if !self.finished {
            return Err(BackendError::NotFinished);
        }
        record(&self.calls, "create_compilation".into());
        let types = |indices: &[u32]| -> Result<Vec<OperandType>, BackendError> {
            indices.iter().map(|&i| self.operand(i).cloned()).collect()
        };
        Ok(TraceCompilation {
            calls: self.calls.clone(),
            inputs: types(&self.inputs)?,
            outputs: types(&self.outputs)?,
            preference: PreferenceCode::default(),
            finished: false,
        })
    }
}

pub struct TraceCompilation {
    calls: CallLog,
    inputs: Vec<OperandType>,
    outputs: Vec<OperandType>,
    preference: PreferenceCode,
    finished: bool,
}

impl TraceCompilation {
    pub fn preference(&self) -> PreferenceCode {
        self.preference
    }
}

impl Compilation for TraceCompilation {
    type Execution = TraceExecution;

    fn set_preference(&mut self, preference: PreferenceCode) -> Result<(), BackendError> {
        if self.finished {
            return Err(BackendError::AlreadyFinished);
        }
        self.preference = preference;
        record(&self.calls, format!("set_preference {preference:?}"));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        if self.finished {
            return Err(BackendError::AlreadyFinished);
        }
        self.finished = true;
        record(&self.calls, "compilation_finish".into());
        Ok(())
    }

    fn create_execution(&self) -> Result<Self::Execution, BackendError> {
        if !self.finished {
            return Err(BackendError::NotFinished);
        }
        record(&self.calls, "create_execution".into());
        Ok(TraceExecution {
            calls: self.calls.clone(),
            input_types: self.inputs.clone(),
            output_types: self.outputs.clone(),
            inputs: vec![None; self.inputs.len()],
            outputs: vec![None; self.outputs.len()],
            results: Vec::new(),
        })
    }
}

pub struct TraceExecution {
    calls: CallLog,
    input_types: Vec<OperandType>,
    output_types: Vec<OperandType>,
    inputs: Vec<Option<TensorData>>,
    outputs: Vec<Option<TensorElemType>>,
    results: Vec<TensorData>,
}

impl TraceExecution {
    fn check_buffer(
        ty: &OperandType,
        index: u32,
        data: &TensorData,
    ) -> Result<(), BackendError> {
        if !accepts(ty.code, data.elem_ty()) || data.len() != ty.total_elems() {
            return Err(invalid(
                index,
                format!("buffer {} does not fit {ty}", data.elem_ty()),
            ));
        }
        Ok(())
    }
}

impl Execution for TraceExecution {
    fn set_input(&mut self, index: u32, data: &TensorData) -> Result<(), BackendError> {
        let ty = self
            .input_types
            .get(index as usize)
            .ok_or(BackendError::BadIndex(index))?;
        Self::check_buffer(ty, index, data)?;
        self.inputs[index as usize] = Some(data.clone());
        record(&self.calls, format!("set_input {index} {data}"));
        Ok(())
    }

    fn set_output(&mut self, index: u32, buffer: &TensorData) -> Result<(), BackendError> {
        let ty = self
            .output_types
            .get(index as usize)
            .ok_or(BackendError::BadIndex(index))?;
        Self::check_buffer(ty, index, buffer)?;
        self.outputs[index as usize] = Some(buffer.elem_ty());
        record(&self.calls, format!("set_output {index}"));
        Ok(())
    }

    fn start_compute(&mut self) -> Result<(), BackendError> {
        if let Some(i) = self.inputs.iter().position(Option::is_none) {
            return Err(BackendError::Message(format!("input {i} is not set").into()));
        }
        self.results = self
            .outputs
            .iter()
            .zip(&self.output_types)
            .enumerate()
            .map(|(i, (&elem_ty, ty))| {
                elem_ty
                    .map(|elem_ty| TensorData::zeros_of_type(elem_ty, ty.total_elems()))
                    .ok_or_else(|| BackendError::Message(format!("output {i} is not set").into()))
            })
            .collect::<Result<_, _>>()?;
        record(&self.calls, "start_compute".into());
        Ok(())
    }

    fn output(&self, index: u32) -> Option<&TensorData> {
        self.results.get(index as usize)
    }
}

/// Whether `elem_ty` is a valid storage type for operands of `code`.
fn accepts(code: OperandCode, elem_ty: TensorElemType) -> bool {
    match code {
        OperandCode::Float32 | OperandCode::TensorFloat32 => elem_ty.is_f32(),
        OperandCode::Int32 | OperandCode::TensorInt32 => elem_ty.is_i32(),
        OperandCode::Uint32 => elem_ty.is_i32(),
        OperandCode::TensorQuant8Asymm
        | OperandCode::TensorQuant8AsymmSigned
        | OperandCode::TensorQuant8SymmPerChannel => elem_ty.is_u8() || elem_ty.is_i8(),
    }
}

fn invalid(index: u32, reason: String) -> BackendError {
    BackendError::InvalidOperand { index, reason }
}

fn record(calls: &CallLog, call: String) {
    log::debug!("{call}");
    calls.borrow_mut().push(call);
}
