use super::{args, input_record, output_name, BuildError, GraphBuilder, SoftmaxPolicy};
use crate::{
    caffe2::FlatOperator,
    operand::OperandType,
    operation::{Operation, OperationCode},
};

impl GraphBuilder {
    pub(super) fn add_softmax(&mut self, op: &FlatOperator) -> Result<(), BuildError> {
        let input_name = input_record(op, 0)?.name.as_str();
        let output_name = output_name(op, 0)?;
        let input_id = self.tensor_id(input_name)?;

        if self.opts.softmax == SoftmaxPolicy::Alias {
            log::debug!("  skip softmax: {input_name} -> {output_name}");
            return self.alias(output_name, input_id);
        }

        let input_ty = self.tensor_type(input_name)?.clone();
        log::debug!("  input shape: {:?}", input_ty.dimensions);

        let beta = self.add_arg_f32(1.0)?;

        let mut output_ty = OperandType::new(input_ty.code, input_ty.dimensions);
        if self.opts.quantized {
            let zero_point = if self.opts.signed_remap { -128 } else { 0 };
            let (scale, zero_point) = args::output_quant(op, 1.0 / 256.0, zero_point)?;
            output_ty = output_ty.with_quant(scale, zero_point);
        }
        log::debug!("  output: {output_ty}");
        let output_id = self.add_tensor(output_name, output_ty, None)?;

        self.add_operation(
            Operation::new(OperationCode::Softmax)
                .with_in(input_id)
                .with_in(beta)
                .with_out(output_id),
        )
    }
}
