use std::time::Instant;

use rustc_hash::FxHashMap;

use super::{
    attr::{bytes_to_string, decode_argument, TypedValue},
    layout::{detect_layout, permute_dims, tensor_nchw_to_nhwc, Layout},
    proto::{NetDef, OperatorDef},
    ModelLoadError,
};
use crate::tensor::TensorData;

/// Switches for [`flatten`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub quantized: bool,
    /// Rewrites uint8 weights with zero point 128 as int8 with zero point 0,
    /// for backends that only take signed weights.
    pub signed_remap: bool,
}

impl LoadOptions {
    pub const fn with_quantized(mut self, quantized: bool) -> Self {
        self.quantized = quantized;
        self
    }

    pub const fn with_signed_remap(mut self, signed_remap: bool) -> Self {
        self.signed_remap = signed_remap;
        self
    }
}

/// What the initializer net knows about one tensor. Inputs produced by other
/// inference operators get a record with only the name set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorRecord {
    pub name: String,
    pub shape: Option<TypedValue>,
    pub values: Option<TypedValue>,
    pub zero_point: Option<TypedValue>,
    pub scale: Option<TypedValue>,
    pub extra: FxHashMap<String, TypedValue>,
}

impl TensorRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn data(&self) -> Option<&TensorData> {
        self.values.as_ref().and_then(TypedValue::as_data)
    }

    /// The shape as dimensions; `None` if absent or negative.
    pub fn dims(&self) -> Option<Vec<u32>> {
        self.shape
            .as_ref()?
            .ints()?
            .iter()
            .map(|&d| u32::try_from(d).ok())
            .collect()
    }

    pub fn scales(&self) -> Option<Vec<f32>> {
        let data = self.scale.as_ref()?.as_data()?;
        (0..data.len())
            .map(|i| data.get_f64(i).map(|x| x as f32))
            .collect()
    }

    pub fn zero_point_i32(&self) -> Option<i32> {
        self.zero_point.as_ref()?.scalar_i32()
    }

    fn insert(&mut self, name: String, value: TypedValue) {
        match name.as_str() {
            "shape" => self.shape = Some(value),
            "values" => self.values = Some(value),
            "Y_zero_point" => self.zero_point = Some(value),
            // Per-layer tensors carry `Y_scale`, per-channel ones `Y_scales`.
            "Y_scale" | "Y_scales" => self.scale = Some(value),
            _ => {
                self.extra.insert(name, value);
            }
        }
    }
}

/// One inference operator with its initializer inputs resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatOperator {
    pub name: String,
    pub op_type: String,
    pub engine: String,
    pub inputs: Vec<TensorRecord>,
    pub outputs: Vec<String>,
    pub args: FxHashMap<String, TypedValue>,
}

impl FlatOperator {
    pub fn arg(&self, name: &str) -> Option<&TypedValue> {
        self.args.get(name)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.inputs.get(index).map(|r| r.name.as_str())
    }

    pub fn output_name(&self, index: usize) -> Option<&str> {
        self.outputs.get(index).map(String::as_str)
    }
}

/// The inference net as an ordered list of self-contained operators.
#[derive(Debug, Clone, Default)]
pub struct Caffe2Model {
    pub ops: Vec<FlatOperator>,
    pub initializers: FxHashMap<String, TensorRecord>,
    pub init_layout: Layout,
    pub predict_layout: Layout,
}

impl Caffe2Model {
    pub fn input_name(&self) -> Option<&str> {
        self.ops.first()?.input_name(0)
    }

    pub fn output_name(&self) -> Option<&str> {
        self.ops.last()?.output_name(0)
    }
}

/// Merges the initializer net `init` into the inference net `predict`.
pub fn flatten(
    predict: &NetDef,
    init: &NetDef,
    opts: LoadOptions,
) -> Result<Caffe2Model, ModelLoadError> {
    let start = Instant::now();

    let init_layout = detect_layout(init)?;
    let predict_layout = detect_layout(predict)?;
    log::info!("layout: init={init_layout:?}, predict={predict_layout:?}");

    let mut initializers = FxHashMap::default();
    for op in &init.op {
        let record = init_record(op, init_layout, opts)?;
        if initializers.contains_key(&record.name) {
            return Err(ModelLoadError::DuplicateTensorName(record.name));
        }
        initializers.insert(record.name.clone(), record);
    }

    let ops = predict
        .op
        .iter()
        .map(|op| flat_operator(op, &initializers, predict_layout))
        .collect::<Result<Vec<_>, _>>()?;

    log::info!("flatten: {:?}", start.elapsed());

    Ok(Caffe2Model {
        ops,
        initializers,
        init_layout,
        predict_layout,
    })
}

fn init_record(
    op: &OperatorDef,
    layout: Layout,
    opts: LoadOptions,
) -> Result<TensorRecord, ModelLoadError> {
    let [name] = op.output.as_slice() else {
        return Err(ModelLoadError::InvalidInitializer {
            tensor: op.output.join(","),
            reason: "an initializer must have exactly one output".into(),
        });
    };

    let mut record = TensorRecord::new(name.clone());
    for arg in &op.arg {
        let value = decode_argument(arg)?;
        record.insert(arg.name.clone().unwrap_or_default(), value);
    }

    if opts.quantized && opts.signed_remap {
        remap_unsigned_to_signed(&mut record);
    }

    if layout.is_channel_first() {
        permute_initializer(&mut record)?;
    }

    Ok(record)
}

/// `uint8` with zero point 128 -> `int8` with zero point 0.
fn remap_unsigned_to_signed(record: &mut TensorRecord) {
    if record.zero_point_i32() != Some(128) {
        return;
    }
    let Some(TypedValue::Data(TensorData::U8(values))) = &record.values else {
        return;
    };
    let signed = values.iter().map(|&v| (v as i16 - 128) as i8).collect();
    record.values = Some(TypedValue::Data(TensorData::I8(signed)));
    record.zero_point = Some(TypedValue::Data(TensorData::I32(vec![0])));
}

fn permute_initializer(record: &mut TensorRecord) -> Result<(), ModelLoadError> {
    let (Some(shape), Some(values)) = (&record.shape, &record.values) else {
        return Ok(());
    };
    let Some(&[n, c, h, w]) = shape.ints() else {
        return Ok(());
    };
    let invalid = |reason: String| ModelLoadError::InvalidInitializer {
        tensor: record.name.clone(),
        reason,
    };

    let mut dims = [0usize; 4];
    for (dim, &d) in dims.iter_mut().zip([n, c, h, w].iter()) {
        *dim = usize::try_from(d).map_err(|_| invalid(format!("negative dimension {d}")))?;
    }

    let data = values
        .as_data()
        .ok_or_else(|| invalid("values are not numeric".into()))?;
    let permuted = tensor_nchw_to_nhwc(data, dims).map_err(|e| invalid(e.to_string()))?;

    record.shape = Some(TypedValue::Data(TensorData::I32(
        permute_dims([n, c, h, w]).to_vec(),
    )));
    record.values = Some(TypedValue::Data(permuted));
    Ok(())
}

fn flat_operator(
    op: &OperatorDef,
    initializers: &FxHashMap<String, TensorRecord>,
    layout: Layout,
) -> Result<FlatOperator, ModelLoadError> {
    let inputs = op
        .input
        .iter()
        .map(|name| {
            initializers
                .get(name)
                .cloned()
                .unwrap_or_else(|| TensorRecord::new(name.clone()))
        })
        .collect();

    let mut args = FxHashMap::default();
    for arg in &op.arg {
        let name = arg.name.clone().unwrap_or_default();
        let mut value = decode_argument(arg)?;
        if name == "order" {
            value = TypedValue::Str(bytes_to_string(&value).unwrap_or_default());
        } else if layout.is_channel_first() && value.len() == 4 {
            value = permute_arg(&name, value);
        }
        args.insert(name, value);
    }

    Ok(FlatOperator {
        name: op.name.clone().unwrap_or_default(),
        op_type: op.r#type.clone().unwrap_or_default(),
        engine: op.engine.clone().unwrap_or_default(),
        inputs,
        outputs: op.output.clone(),
        args,
    })
}

/// Reorders a 4-element argument as `(N, C, H, W)` -> `(N, H, W, C)`.
fn permute_arg(name: &str, value: TypedValue) -> TypedValue {
    // `pads` holds spatial offsets, not a shape.
    if name == "pads" {
        log::warn!("leaving 4-element argument '{name}' unpermuted");
        return value;
    }
    let data = match value {
        TypedValue::Data(data) => data,
        other => return other,
    };
    let permuted = match data {
        TensorData::F32(v) => TensorData::F32(permute_dims([v[0], v[1], v[2], v[3]]).to_vec()),
        TensorData::I32(v) => TensorData::I32(permute_dims([v[0], v[1], v[2], v[3]]).to_vec()),
        TensorData::U8(v) => TensorData::U8(permute_dims([v[0], v[1], v[2], v[3]]).to_vec()),
        TensorData::I8(v) => TensorData::I8(permute_dims([v[0], v[1], v[2], v[3]]).to_vec()),
    };
    TypedValue::Data(permuted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caffe2::proto::Argument;

    fn fill(name: &str, shape: &[i64], values: Argument) -> OperatorDef {
        OperatorDef::new("Int8GivenTensorFill")
            .with_out(name)
            .with_arg(Argument::named("shape").with_ints(shape.to_vec()))
            .with_arg(values)
    }

    #[test]
    fn signed_remap() {
        let init = NetDef {
            op: vec![fill(
                "w",
                &[3],
                Argument::named("values").with_s(vec![0u8, 128, 255]),
            )
            .with_arg(Argument::named("Y_zero_point").with_i(128))
            .with_arg(Argument::named("Y_scale").with_f(0.5))],
            ..Default::default()
        };
        let opts = LoadOptions::default()
            .with_quantized(true)
            .with_signed_remap(true);
        let model = flatten(&NetDef::default(), &init, opts).unwrap();
        let w = &model.initializers["w"];
        assert_eq!(w.data(), Some(&TensorData::I8(vec![-128, 0, 127])));
        assert_eq!(w.zero_point_i32(), Some(0));
        assert_eq!(w.scales(), Some(vec![0.5]));
    }

    #[test]
    fn no_remap_without_both_flags() {
        let init = NetDef {
            op: vec![fill(
                "w",
                &[3],
                Argument::named("values").with_s(vec![0u8, 128, 255]),
            )
            .with_arg(Argument::named("Y_zero_point").with_i(128))],
            ..Default::default()
        };
        let opts = LoadOptions::default().with_signed_remap(true);
        let model = flatten(&NetDef::default(), &init, opts).unwrap();
        assert_eq!(
            model.initializers["w"].data(),
            Some(&TensorData::U8(vec![0, 128, 255]))
        );
    }

    #[test]
    fn no_remap_for_other_zero_points() {
        let init = NetDef {
            op: vec![fill("w", &[1], Argument::named("values").with_s(vec![7u8]))
                .with_arg(Argument::named("Y_zero_point").with_i(0))],
            ..Default::default()
        };
        let opts = LoadOptions::default()
            .with_quantized(true)
            .with_signed_remap(true);
        let model = flatten(&NetDef::default(), &init, opts).unwrap();
        assert_eq!(model.initializers["w"].data(), Some(&TensorData::U8(vec![7])));
    }

    #[test]
    fn channel_first_initializer_is_permuted() {
        let init = NetDef {
            op: vec![
                fill(
                    "w",
                    &[1, 2, 1, 3],
                    Argument::named("values").with_floats(vec![1., 2., 3., 10., 20., 30.]),
                )
                .with_arg(Argument::named("order").with_s("NCHW")),
                fill("b", &[2], Argument::named("values").with_ints(vec![5, 6])),
            ],
            ..Default::default()
        };
        let model = flatten(&NetDef::default(), &init, LoadOptions::default()).unwrap();
        assert_eq!(model.init_layout, Layout::ChannelFirst);
        let w = &model.initializers["w"];
        assert_eq!(w.dims(), Some(vec![1, 1, 3, 2]));
        assert_eq!(
            w.data(),
            Some(&TensorData::F32(vec![1., 10., 2., 20., 3., 30.]))
        );
        let b = &model.initializers["b"];
        assert_eq!(b.dims(), Some(vec![2]));
        assert_eq!(b.data(), Some(&TensorData::I32(vec![5, 6])));
    }

    #[test]
    fn channel_last_initializer_is_untouched() {
        let init = NetDef {
            op: vec![fill(
                "w",
                &[1, 2, 1, 3],
                Argument::named("values").with_floats(vec![1., 2., 3., 10., 20., 30.]),
            )],
            ..Default::default()
        };
        let model = flatten(&NetDef::default(), &init, LoadOptions::default()).unwrap();
        assert_eq!(model.initializers["w"].dims(), Some(vec![1, 2, 1, 3]));
    }

    #[test]
    fn mismatched_initializer_is_rejected() {
        let init = NetDef {
            op: vec![fill(
                "w",
                &[1, 2, 2, 2],
                Argument::named("values").with_floats(vec![1., 2.]),
            )
            .with_arg(Argument::named("order").with_s("NCHW"))],
            ..Default::default()
        };
        assert!(matches!(
            flatten(&NetDef::default(), &init, LoadOptions::default()),
            Err(ModelLoadError::InvalidInitializer { .. })
        ));
    }

    #[test]
    fn oversized_initializer_is_rejected() {
        let init = NetDef {
            op: vec![fill(
                "w",
                &[1, 2, 1, 1],
                Argument::named("values").with_floats(vec![1., 2., 3., 4., 5.]),
            )
            .with_arg(Argument::named("order").with_s("NCHW"))],
            ..Default::default()
        };
        assert!(matches!(
            flatten(&NetDef::default(), &init, LoadOptions::default()),
            Err(ModelLoadError::InvalidInitializer { tensor, .. }) if tensor == "w"
        ));
    }

    #[test]
    fn duplicate_initializer_is_rejected() {
        let init = NetDef {
            op: vec![
                fill("w", &[1], Argument::named("values").with_ints(vec![1])),
                fill("w", &[1], Argument::named("values").with_ints(vec![2])),
            ],
            ..Default::default()
        };
        assert!(matches!(
            flatten(&NetDef::default(), &init, LoadOptions::default()),
            Err(ModelLoadError::DuplicateTensorName(name)) if name == "w"
        ));
    }

    #[test]
    fn predict_ops_resolve_initializers() {
        let init = NetDef {
            op: vec![fill("w", &[2], Argument::named("values").with_ints(vec![1, 2]))],
            ..Default::default()
        };
        let predict = NetDef {
            op: vec![
                OperatorDef::new("Int8Conv")
                    .with_name("conv1")
                    .with_in("data")
                    .with_in("w")
                    .with_out("conv1")
                    .with_arg(Argument::named("order").with_s("NHWC"))
                    .with_arg(Argument::named("kernels").with_ints(vec![3, 3])),
                OperatorDef::new("Softmax").with_in("conv1").with_out("prob"),
            ],
            ..Default::default()
        };
        let model = flatten(&predict, &init, LoadOptions::default()).unwrap();
        assert_eq!(model.ops.len(), 2);
        let conv = &model.ops[0];
        assert_eq!(conv.op_type, "Int8Conv");
        assert_eq!(conv.name, "conv1");
        assert_eq!(conv.inputs[0], TensorRecord::new("data"));
        assert_eq!(conv.inputs[1].data(), Some(&TensorData::I32(vec![1, 2])));
        assert_eq!(conv.arg("order").and_then(TypedValue::as_str), Some("NHWC"));
        assert_eq!(conv.arg("kernels").and_then(TypedValue::ints), Some(&[3, 3][..]));
        assert_eq!(model.input_name(), Some("data"));
        assert_eq!(model.output_name(), Some("prob"));
    }

    #[test]
    fn channel_first_shape_args_are_permuted() {
        let predict = NetDef {
            op: vec![OperatorDef::new("Reshape")
                .with_in("x")
                .with_out("y")
                .with_arg(Argument::named("order").with_s("NCHW"))
                .with_arg(Argument::named("shape").with_ints(vec![1, 8, 4, 2]))
                .with_arg(Argument::named("dims").with_ints(vec![2, 3, 5, 7]))
                .with_arg(Argument::named("pads").with_ints(vec![1, 0, 1, 0]))],
            ..Default::default()
        };
        let model = flatten(&predict, &NetDef::default(), LoadOptions::default()).unwrap();
        let op = &model.ops[0];
        assert_eq!(op.arg("shape").and_then(TypedValue::ints), Some(&[1, 4, 2, 8][..]));
        assert_eq!(op.arg("dims").and_then(TypedValue::ints), Some(&[2, 5, 7, 3][..]));
        assert_eq!(op.arg("pads").and_then(TypedValue::ints), Some(&[1, 0, 1, 0][..]));
        assert_eq!(op.arg("order").and_then(TypedValue::as_str), Some("NCHW"));
    }
}
