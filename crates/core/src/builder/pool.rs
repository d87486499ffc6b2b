use super::{args, input_record, nhwc, output_name, BuildError, GraphBuilder};
use crate::{
    caffe2::FlatOperator,
    operand::OperandType,
    operation::{Operation, OperationCode},
};

impl GraphBuilder {
    /// `Int8AveragePool` -> `AVERAGE_POOL_2D`.
    pub(super) fn add_average_pool(&mut self, op: &FlatOperator) -> Result<(), BuildError> {
        let input_name = input_record(op, 0)?.name.as_str();
        let input_id = self.tensor_id(input_name)?;
        let input_ty = self.tensor_type(input_name)?.clone();
        let input_dims = nhwc(input_name, &input_ty.dimensions)?;
        let [_, in_h, in_w, in_c] = input_dims;
        log::debug!("  input shape: {:?}", input_ty.dimensions);

        let global = args::optional_i32(op, "global_pooling")?.unwrap_or(0) != 0;
        let mut window = args::Window::from_op(op, global.then(|| [in_h as i32, in_w as i32]))?;
        if global {
            window.kernel = [in_h as i32, in_w as i32];
        }
        let fuse = args::fuse_code(op)?;
        log::debug!(
            "  kernel: {:?}, pads: {:?}, strides: {:?}, fuse: {fuse:?}",
            window.kernel,
            window.pads,
            window.stride
        );

        let [kernel_h, kernel_w] = window.kernel;
        let [stride_h, stride_w] = window.stride;
        let inputs = vec![
            input_id,
            self.add_arg_i32(window.pads.left)?,
            self.add_arg_i32(window.pads.right)?,
            self.add_arg_i32(window.pads.top)?,
            self.add_arg_i32(window.pads.bottom)?,
            self.add_arg_i32(stride_w)?,
            self.add_arg_i32(stride_h)?,
            self.add_arg_i32(kernel_w)?,
            self.add_arg_i32(kernel_h)?,
            self.add_arg_i32(fuse as i32)?,
        ];

        let output_dims = window.output_dims(op, input_dims, in_c)?;
        let mut output_ty = OperandType::new(input_ty.code, output_dims);
        if self.opts.quantized {
            let (scale, zero_point) = args::output_quant(
                op,
                input_ty.scale.unwrap_or(1.0),
                input_ty.zero_point.unwrap_or(0),
            )?;
            output_ty = output_ty.with_quant(scale, zero_point);
        }
        log::debug!("  output: {output_ty}");
        let output_id = self.add_tensor(output_name(op, 0)?, output_ty, None)?;

        self.add_operation(
            Operation::new(OperationCode::AveragePool2d)
                .with_ins(inputs)
                .with_out(output_id),
        )
    }
}
