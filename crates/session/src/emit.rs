use std::time::Instant;

use nnimport_core::{graph::Graph, operand::OperandId};

use crate::{backend::Model, SessionError};

/// Replays `graph` into `model`: operand types in id order, then values,
/// then per-channel quantization, then operations, then the graph's inputs
/// and outputs.
pub fn emit_graph<M: Model>(graph: &Graph, model: &mut M) -> Result<(), SessionError> {
    let start = Instant::now();

    for (id, operand) in graph.operands.iter() {
        let index = model.add_operand(&operand.ty)?;
        if index as usize != id.index() {
            return Err(SessionError::OperandIdMismatch {
                expected: id.index(),
                actual: index,
            });
        }
    }

    for (id, value) in graph.sorted_values() {
        model.set_operand_value(index(id), value)?;
    }

    for (id, params) in graph.sorted_quant_params() {
        model.set_operand_symm_per_channel_quant_params(index(id), params)?;
    }

    for op in &graph.operations {
        model.add_operation(op.code, &indices(&op.inputs), &indices(&op.outputs))?;
    }

    model.identify_inputs_and_outputs(&indices(&graph.inputs), &indices(&graph.outputs))?;

    log::info!("emit_graph: {:?}", start.elapsed());

    Ok(())
}

fn index(id: OperandId) -> u32 {
    id.index() as u32
}

fn indices(ids: &[OperandId]) -> Vec<u32> {
    ids.iter().copied().map(index).collect()
}
