use super::{args, input_record, nhwc, output_name, BuildError, GraphBuilder};
use crate::{
    caffe2::{layout::tensor_depthwise_filter_to_1hwn, FlatOperator, TensorRecord},
    operand::{OperandCode, OperandType, PerChannelQuantParams},
    operation::{Operation, OperationCode},
    tensor::TensorData,
};

impl GraphBuilder {
    /// `Int8Conv` / `Int8ConvRelu` -> `CONV_2D` or `DEPTHWISE_CONV_2D`.
    pub(super) fn add_conv(&mut self, op: &FlatOperator) -> Result<(), BuildError> {
        let input_name = input_record(op, 0)?.name.as_str();
        let filter = input_record(op, 1)?;
        let bias = input_record(op, 2)?;

        let input_id = self.tensor_id(input_name)?;
        let input_ty = self.tensor_type(input_name)?.clone();
        let input_dims = nhwc(input_name, &input_ty.dimensions)?;
        log::debug!("  input shape: {:?}", input_ty.dimensions);

        let mut filter_dims = record_dims(filter)?;
        let mut filter_value = record_data(filter)?.clone();
        let filter_scales = filter.scales().unwrap_or_default();
        let per_channel = filter_scales.len() > 1;

        let channels = input_dims[3];
        let group = args::optional_i32(op, "group")?.unwrap_or(1);
        if group < 0 {
            return Err(BuildError::InvalidArgument {
                op: op.name.clone(),
                name: "group",
                reason: format!("{group} is negative"),
            });
        }
        let depthwise = group > 1;
        if depthwise {
            if group as u32 != channels {
                return Err(BuildError::UnsupportedGrouping {
                    op: op.name.clone(),
                    group,
                    channels,
                });
            }
            log::debug!("  group: {group} (depthwise convolution)");
            let [n, h, w, depth] = nhwc(&filter.name, &filter_dims)?;
            if depth != 1 || filter_value.len() != n as usize * h as usize * w as usize {
                return Err(BuildError::InvalidShape {
                    tensor: filter.name.clone(),
                    reason: format!(
                        "depthwise filter {filter_dims:?} with {} values is not (N, H, W, 1)",
                        filter_value.len()
                    ),
                });
            }
            filter_value = tensor_depthwise_filter_to_1hwn(
                &filter_value,
                [n as usize, h as usize, w as usize],
            )
            .map_err(|e| BuildError::InvalidShape {
                tensor: filter.name.clone(),
                reason: e.to_string(),
            })?;
            filter_dims[0] = 1;
            filter_dims[3] = group as u32;
        }
        log::debug!("  filter shape: {filter_dims:?}");

        let window = args::Window::from_op(op, None)?;
        let fuse = args::fuse_code(op)?;
        log::debug!(
            "  pads: {:?}, strides: {:?}, fuse: {fuse:?}",
            window.pads,
            window.stride
        );

        let filter_ty = if per_channel {
            OperandType::new(OperandCode::TensorQuant8SymmPerChannel, filter_dims)
        } else if self.opts.quantized {
            let scale = filter_scales
                .first()
                .copied()
                .ok_or_else(|| missing_data(filter, "Y_scale"))?;
            let zero_point = filter
                .zero_point_i32()
                .ok_or_else(|| missing_data(filter, "Y_zero_point"))?;
            OperandType::new(input_ty.code, filter_dims).with_quant(scale, zero_point)
        } else {
            OperandType::new(input_ty.code, filter_dims)
        };

        let bias_dims = record_dims(bias)?;
        let bias_value = record_data(bias)?.clone();
        let out_channels = *bias_dims.first().ok_or_else(|| BuildError::InvalidShape {
            tensor: bias.name.clone(),
            reason: "bias has no dimensions".into(),
        })?;
        let bias_ty = if self.opts.quantized {
            let ty = OperandType::new(OperandCode::TensorInt32, bias_dims);
            if per_channel {
                ty
            } else {
                let scale = bias
                    .scales()
                    .and_then(|s| s.first().copied())
                    .ok_or_else(|| missing_data(bias, "Y_scale"))?;
                ty.with_quant(scale, bias.zero_point_i32().unwrap_or(0))
            }
        } else {
            OperandType::new(OperandCode::TensorFloat32, bias_dims)
        };

        let filter_id = self.add_tensor(&filter.name, filter_ty, Some(filter_value))?;
        if per_channel {
            let channel_dim = if depthwise { 3 } else { 0 };
            self.set_quant_params(
                filter_id,
                PerChannelQuantParams {
                    channel_dim,
                    scales: filter_scales,
                },
            )?;
        }
        let bias_id = self.add_tensor(&bias.name, bias_ty, Some(bias_value))?;

        let [stride_h, stride_w] = window.stride;
        let mut inputs = vec![
            input_id,
            filter_id,
            bias_id,
            self.add_arg_i32(window.pads.left)?,
            self.add_arg_i32(window.pads.right)?,
            self.add_arg_i32(window.pads.top)?,
            self.add_arg_i32(window.pads.bottom)?,
            self.add_arg_i32(stride_w)?,
            self.add_arg_i32(stride_h)?,
        ];
        if depthwise {
            // depth multiplier
            inputs.push(self.add_arg_i32(1)?);
        }
        inputs.push(self.add_arg_i32(fuse as i32)?);

        let output_dims = window.output_dims(op, input_dims, out_channels)?;
        let mut output_ty = OperandType::new(input_ty.code, output_dims);
        if self.opts.quantized {
            let (scale, zero_point) = args::output_quant(op, 1.0, 0)?;
            output_ty = output_ty.with_quant(scale, zero_point);
        }
        log::debug!("  output: {output_ty}");
        let output_id = self.add_tensor(output_name(op, 0)?, output_ty, None)?;

        let code = if depthwise {
            OperationCode::DepthwiseConv2d
        } else {
            OperationCode::Conv2d
        };
        self.add_operation(Operation::new(code).with_ins(inputs).with_out(output_id))
    }
}

fn record_dims(record: &TensorRecord) -> Result<Vec<u32>, BuildError> {
    match (&record.shape, record.dims()) {
        (_, Some(dims)) => Ok(dims),
        (Some(shape), None) => Err(BuildError::InvalidShape {
            tensor: record.name.clone(),
            reason: format!("{shape} is not a list of dimensions"),
        }),
        (None, None) => Err(missing_data(record, "shape")),
    }
}

fn record_data(record: &TensorRecord) -> Result<&TensorData, BuildError> {
    record.data().ok_or_else(|| missing_data(record, "values"))
}

fn missing_data(record: &TensorRecord, field: &'static str) -> BuildError {
    BuildError::MissingTensorData {
        tensor: record.name.clone(),
        field,
    }
}
