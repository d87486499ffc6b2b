use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    builder::BuildError,
    operand::{OperandArena, OperandId, PerChannelQuantParams},
    operation::{Operation, OperationCode},
    tensor::TensorData,
};

/// A built graph, ready to be replayed into an execution backend.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    pub operands: OperandArena,
    pub values: FxHashMap<OperandId, TensorData>,
    pub quant_params: FxHashMap<OperandId, PerChannelQuantParams>,
    pub operations: Vec<Operation>,
    pub tensor_ids: FxHashMap<String, OperandId>,
    pub inputs: Vec<OperandId>,
    pub outputs: Vec<OperandId>,
    pub required_ops: FxHashSet<OperationCode>,
}

impl Graph {
    pub fn tensor_id(&self, name: &str) -> Option<OperandId> {
        self.tensor_ids.get(name).copied()
    }

    /// Bound operand values in id order.
    pub fn sorted_values(&self) -> Vec<(OperandId, &TensorData)> {
        let mut values = self.values.iter().map(|(&id, v)| (id, v)).collect::<Vec<_>>();
        values.sort_by_key(|(id, _)| id.index());
        values
    }

    /// Per-channel quantization parameters in id order.
    pub fn sorted_quant_params(&self) -> Vec<(OperandId, &PerChannelQuantParams)> {
        let mut params = self
            .quant_params
            .iter()
            .map(|(&id, p)| (id, p))
            .collect::<Vec<_>>();
        params.sort_by_key(|(id, _)| id.index());
        params
    }

    pub fn required_ops(&self) -> Vec<OperationCode> {
        let mut ops = self.required_ops.iter().copied().collect::<Vec<_>>();
        ops.sort();
        ops
    }

    /// Checks that every id referenced by an operation, a value, a
    /// quantization entry or the graph's inputs/outputs is an operand of this
    /// graph.
    pub fn validate(&self) -> Result<(), BuildError> {
        let check = |id: OperandId| {
            if self.operands.contains(id) {
                Ok(())
            } else {
                Err(BuildError::UnknownOperand(id.index()))
            }
        };

        self.operations
            .iter()
            .flat_map(|op| op.inputs.iter().chain(op.outputs.iter()))
            .chain(self.values.keys())
            .chain(self.quant_params.keys())
            .chain(self.inputs.iter())
            .chain(self.outputs.iter())
            .try_for_each(|&id| check(id))
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, operand) in self.operands.iter() {
            write!(f, "%{}: {}", id.index(), operand.ty)?;
            if let Some(name) = &operand.name {
                write!(f, " {name:?}")?;
            }
            if let Some(value) = self.values.get(&id) {
                write!(f, " = {value}")?;
            }
            if let Some(params) = self.quant_params.get(&id) {
                write!(
                    f,
                    " per_channel(dim={}, scales={:?})",
                    params.channel_dim, params.scales
                )?;
            }
            writeln!(f)?;
        }
        for op in &self.operations {
            writeln!(f, "{op}")?;
        }
        let ids = |ids: &[OperandId]| ids.iter().map(|id| id.index()).collect::<Vec<_>>();
        write!(
            f,
            "inputs: {:?}, outputs: {:?}",
            ids(&self.inputs),
            ids(&self.outputs)
        )
    }
}
