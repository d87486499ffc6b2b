use std::{fs, path::Path};

use nnimport_core::{
    builder::{BuildError, SoftmaxPolicy},
    caffe2::{
        load_caffe2_from_buffers, load_caffe2_pair,
        proto::{Argument, NetDef, OperatorDef},
        LoadOptions, ModelLoadError,
    },
    operand::OperandCode,
    operation::OperationCode,
    tensor::TensorData,
};
use nnimport_session::{
    backend::{BackendError, PreferenceCode},
    trace::TraceBackend,
    Caffe2ImporterBuilder, SessionError,
};
use prost::Message;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fill(ty: &str, name: &str, shape: &[i64]) -> OperatorDef {
    OperatorDef::new(ty)
        .with_out(name)
        .with_arg(Argument::named("shape").with_ints(shape.to_vec()))
}

/// conv (4x4x2 -> 4x4x3) -> average pool (-> 1x1x3) -> softmax, uint8.
fn quantized_nets() -> (NetDef, NetDef) {
    let init = NetDef {
        name: Some("init".into()),
        op: vec![
            fill("Int8GivenTensorFill", "w", &[3, 3, 3, 2])
                .with_arg(Argument::named("values").with_s(vec![128u8; 54]))
                .with_arg(Argument::named("Y_scale").with_f(0.1))
                .with_arg(Argument::named("Y_zero_point").with_i(128)),
            fill("Int8GivenIntTensorFill", "b", &[3])
                .with_arg(Argument::named("values").with_ints(vec![1i64, 2, 3]))
                .with_arg(Argument::named("Y_scale").with_f(0.05))
                .with_arg(Argument::named("Y_zero_point").with_i(0)),
        ],
        ..Default::default()
    };
    let predict = NetDef {
        name: Some("predict".into()),
        op: vec![
            OperatorDef::new("Int8Conv")
                .with_name("conv1")
                .with_in("data")
                .with_in("w")
                .with_in("b")
                .with_out("conv1")
                .with_arg(Argument::named("order").with_s("NHWC"))
                .with_arg(Argument::named("kernels").with_ints(vec![3i64, 3]))
                .with_arg(Argument::named("strides").with_ints(vec![1i64, 1]))
                .with_arg(Argument::named("pads").with_ints(vec![1i64, 1, 1, 1]))
                .with_arg(Argument::named("X_scale").with_f(0.5))
                .with_arg(Argument::named("X_zero_point").with_i(128))
                .with_arg(Argument::named("Y_scale").with_f(0.25))
                .with_arg(Argument::named("Y_zero_point").with_i(10)),
            OperatorDef::new("Int8AveragePool")
                .with_name("pool1")
                .with_in("conv1")
                .with_out("pool1")
                .with_arg(Argument::named("order").with_s("NHWC"))
                .with_arg(Argument::named("kernels").with_ints(vec![4i64, 4]))
                .with_arg(Argument::named("strides").with_ints(vec![1i64, 1])),
            OperatorDef::new("Softmax")
                .with_name("softmax")
                .with_in("pool1")
                .with_out("prob"),
        ],
        ..Default::default()
    };
    (predict, init)
}

/// A single float 3x3 convolution over a 3x3x1 input.
fn float_nets() -> (NetDef, NetDef) {
    let init = NetDef {
        op: vec![
            fill("GivenTensorFill", "w", &[1, 3, 3, 1]).with_arg(
                Argument::named("values").with_floats((1..=9).map(|x| x as f32).collect::<Vec<_>>()),
            ),
            fill("GivenTensorFill", "b", &[1])
                .with_arg(Argument::named("values").with_floats(vec![0.5f32])),
        ],
        ..Default::default()
    };
    let predict = NetDef {
        op: vec![OperatorDef::new("Conv")
            .with_name("conv1")
            .with_in("data")
            .with_in("w")
            .with_in("b")
            .with_out("conv1")
            .with_arg(Argument::named("kernels").with_ints(vec![3i64, 3]))],
        ..Default::default()
    };
    (predict, init)
}

fn write_pair(dir: &Path, (predict, init): &(NetDef, NetDef)) -> std::path::PathBuf {
    let predict_path = dir.join("predict_net.pb");
    fs::write(&predict_path, predict.encode_to_vec()).unwrap();
    fs::write(dir.join("init_net.pb"), init.encode_to_vec()).unwrap();
    predict_path
}

/// Stage names of the recorded calls with consecutive repeats collapsed.
fn stages(calls: &[String]) -> Vec<&str> {
    let mut stages = calls
        .iter()
        .map(|call| call.split(' ').next().unwrap_or_default())
        .collect::<Vec<_>>();
    stages.dedup();
    stages
}

#[test]
fn quantized_model_end_to_end() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let predict_path = write_pair(dir.path(), &quantized_nets());
    let model = load_caffe2_pair(&predict_path, LoadOptions::default().with_quantized(true)).unwrap();

    let backend = TraceBackend::new();
    let mut importer = Caffe2ImporterBuilder::new(&model, backend.clone())
        .with_quantized(true)
        .with_input_size(&[4, 4, 2])
        .build();
    importer.create_compiled_model().unwrap();

    assert_eq!(
        importer.required_ops(),
        vec![OperationCode::AveragePool2d, OperationCode::Conv2d]
    );

    let calls = backend.calls();
    assert_eq!(
        stages(&calls),
        vec![
            "create_model",
            "add_operand",
            "set_operand_value",
            "add_operation",
            "identify_inputs_and_outputs",
            "finish",
            "create_compilation",
            "set_preference",
            "compilation_finish",
            "create_execution",
        ]
    );
    let count = |stage: &str| calls.iter().filter(|c| c.starts_with(stage)).count();
    assert_eq!(count("add_operand "), 21);
    assert_eq!(count("set_operand_value "), 18);
    assert_eq!(count("add_operation "), 2);
    assert!(calls.contains(&"identify_inputs_and_outputs [0] -> [20]".to_string()));

    let graph = importer.graph().unwrap();
    let output = &graph.operands[graph.outputs[0]].ty;
    assert_eq!(output.code, OperandCode::TensorQuant8Asymm);
    assert_eq!(output.dimensions, vec![1, 1, 1, 3]);

    let inputs = [TensorData::U8(vec![128; 32])];
    let mut outputs = [TensorData::U8(vec![7; 3])];
    importer.compute(&inputs, &mut outputs).unwrap();
    assert_eq!(outputs[0], TensorData::U8(vec![0; 3]));
    assert!(stages(&backend.calls()).ends_with(&["set_input", "set_output", "start_compute"]));
}

#[test]
fn signed_remap_end_to_end() {
    let (predict, init) = quantized_nets();
    let opts = LoadOptions::default()
        .with_quantized(true)
        .with_signed_remap(true);
    let model =
        load_caffe2_from_buffers(&predict.encode_to_vec(), &init.encode_to_vec(), opts).unwrap();

    let mut importer = Caffe2ImporterBuilder::new(&model, TraceBackend::new())
        .with_quantized(true)
        .with_signed_remap(true)
        .with_input_size(&[4, 4, 2])
        .build();
    importer.create_compiled_model().unwrap();

    let graph = importer.graph().unwrap();
    let w = graph.tensor_id("w").unwrap();
    assert_eq!(graph.values[&w], TensorData::I8(vec![0; 54]));
    assert_eq!(graph.operands[w].ty.zero_point, Some(0));
    assert_eq!(
        graph.operands[graph.inputs[0]].ty.code,
        OperandCode::TensorQuant8AsymmSigned
    );

    let mut outputs = [TensorData::I8(vec![1; 3])];
    importer
        .compute(&[TensorData::I8(vec![0; 32])], &mut outputs)
        .unwrap();
    assert_eq!(outputs[0], TensorData::I8(vec![0; 3]));
}

#[test]
fn emitted_calls() {
    let (predict, init) = float_nets();
    let mut predict = predict;
    predict.op[0].r#type = Some("Int8Conv".into());
    let model = load_caffe2_from_buffers(
        &predict.encode_to_vec(),
        &init.encode_to_vec(),
        LoadOptions::default(),
    )
    .unwrap();

    let backend = TraceBackend::new();
    let mut importer = Caffe2ImporterBuilder::new(&model, backend.clone())
        .with_input_size(&[3, 3, 1])
        .with_preference(PreferenceCode::SustainedSpeed)
        .build();
    importer.create_compiled_model().unwrap();

    insta::assert_snapshot!(backend.calls().join("\n"), @r###"
    create_model eager=false supported_ops=[]
    add_operand TENSOR_FLOAT32[1, 3, 3, 1] -> 0
    add_operand TENSOR_FLOAT32[1, 3, 3, 1] -> 1
    add_operand TENSOR_FLOAT32[1] -> 2
    add_operand INT32[] -> 3
    add_operand INT32[] -> 4
    add_operand INT32[] -> 5
    add_operand INT32[] -> 6
    add_operand INT32[] -> 7
    add_operand INT32[] -> 8
    add_operand INT32[] -> 9
    add_operand TENSOR_FLOAT32[1, 1, 1, 1] -> 10
    set_operand_value 1 float32(9, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0])
    set_operand_value 2 float32(1, [0.5])
    set_operand_value 3 int32(1, [0])
    set_operand_value 4 int32(1, [0])
    set_operand_value 5 int32(1, [0])
    set_operand_value 6 int32(1, [0])
    set_operand_value 7 int32(1, [1])
    set_operand_value 8 int32(1, [1])
    set_operand_value 9 int32(1, [0])
    add_operation CONV_2D [0, 1, 2, 3, 4, 5, 6, 7, 8, 9] -> [10]
    identify_inputs_and_outputs [0] -> [10]
    finish
    create_compilation
    set_preference SustainedSpeed
    compilation_finish
    create_execution
    "###);
}

#[test]
fn unsupported_operator_is_fatal() {
    let (predict, init) = float_nets();
    let model = load_caffe2_from_buffers(
        &predict.encode_to_vec(),
        &init.encode_to_vec(),
        LoadOptions::default(),
    )
    .unwrap();

    let backend = TraceBackend::new();
    let mut importer = Caffe2ImporterBuilder::new(&model, backend.clone())
        .with_input_size(&[3, 3, 1])
        .build();
    assert!(matches!(
        importer.create_compiled_model(),
        Err(SessionError::Build(BuildError::UnsupportedOperator(ty))) if ty == "Conv"
    ));
    // Nothing reaches the backend.
    assert!(backend.calls().is_empty());
    assert!(importer.graph().is_none());
}

#[test]
fn compute_before_compile() {
    let (predict, init) = quantized_nets();
    let model = load_caffe2_from_buffers(
        &predict.encode_to_vec(),
        &init.encode_to_vec(),
        LoadOptions::default().with_quantized(true),
    )
    .unwrap();
    let mut importer = Caffe2ImporterBuilder::new(&model, TraceBackend::new())
        .with_quantized(true)
        .with_input_size(&[4, 4, 2])
        .build();

    assert!(importer.required_ops().is_empty());
    let mut outputs = [TensorData::U8(vec![0; 3])];
    assert!(matches!(
        importer.compute(&[TensorData::U8(vec![0; 32])], &mut outputs),
        Err(SessionError::NotCompiled)
    ));
}

#[test]
fn compute_rejects_mismatched_buffers() {
    let (predict, init) = quantized_nets();
    let model = load_caffe2_from_buffers(
        &predict.encode_to_vec(),
        &init.encode_to_vec(),
        LoadOptions::default().with_quantized(true),
    )
    .unwrap();
    let mut importer = Caffe2ImporterBuilder::new(&model, TraceBackend::new())
        .with_quantized(true)
        .with_input_size(&[4, 4, 2])
        .build();
    importer.create_compiled_model().unwrap();

    let mut outputs = [TensorData::U8(vec![0; 3])];
    assert!(matches!(
        importer.compute(&[TensorData::U8(vec![0; 31])], &mut outputs),
        Err(SessionError::Backend(BackendError::InvalidOperand { index: 0, .. }))
    ));
    let mut outputs = [TensorData::F32(vec![0.0; 3])];
    assert!(matches!(
        importer.compute(&[TensorData::U8(vec![0; 32])], &mut outputs),
        Err(SessionError::Backend(BackendError::InvalidOperand { .. }))
    ));
}

#[test]
fn backend_rejects_unsupported_operation() {
    let (predict, init) = quantized_nets();
    let model = load_caffe2_from_buffers(
        &predict.encode_to_vec(),
        &init.encode_to_vec(),
        LoadOptions::default().with_quantized(true),
    )
    .unwrap();

    let backend = TraceBackend::new();
    let mut importer = Caffe2ImporterBuilder::new(&model, backend.clone())
        .with_quantized(true)
        .with_input_size(&[4, 4, 2])
        .with_eager(true)
        .with_supported_ops(vec![OperationCode::Conv2d])
        .build();
    assert!(matches!(
        importer.create_compiled_model(),
        Err(SessionError::Backend(BackendError::UnsupportedOperation(
            OperationCode::AveragePool2d
        )))
    ));
    assert!(backend.calls()[0].starts_with("create_model eager=true"));
    assert!(importer.required_ops().is_empty());
}

#[test]
fn emitted_softmax() {
    let (mut predict, init) = quantized_nets();
    // Drop the pooling layer so softmax consumes the convolution.
    predict.op.remove(1);
    predict.op[1].input = vec!["conv1".into()];
    let opts = LoadOptions::default().with_quantized(true);
    let model =
        load_caffe2_from_buffers(&predict.encode_to_vec(), &init.encode_to_vec(), opts).unwrap();

    let mut importer = Caffe2ImporterBuilder::new(&model, TraceBackend::new())
        .with_quantized(true)
        .with_input_size(&[4, 4, 2])
        .with_softmax(SoftmaxPolicy::Emit)
        .build();
    importer.create_compiled_model().unwrap();

    assert_eq!(
        importer.required_ops(),
        vec![OperationCode::Conv2d, OperationCode::Softmax]
    );
    let graph = importer.graph().unwrap();
    let prob = &graph.operands[graph.tensor_id("prob").unwrap()].ty;
    assert_eq!(prob.scale, Some(1.0 / 256.0));
    assert_eq!(prob.zero_point, Some(0));

    let mut outputs = [TensorData::U8(vec![1; 48])];
    importer
        .compute(&[TensorData::U8(vec![0; 32])], &mut outputs)
        .unwrap();
    assert_eq!(outputs[0], TensorData::U8(vec![0; 48]));
}

#[test]
fn channel_first_model() {
    let init = NetDef {
        op: vec![
            fill("GivenTensorFill", "w", &[1, 2, 1, 1])
                .with_arg(Argument::named("values").with_floats(vec![1.0f32, 2.0]))
                .with_arg(Argument::named("order").with_s("NCHW")),
            fill("GivenTensorFill", "b", &[1])
                .with_arg(Argument::named("values").with_floats(vec![0.0f32])),
        ],
        ..Default::default()
    };
    let predict = NetDef {
        op: vec![OperatorDef::new("Int8Conv")
            .with_name("conv1")
            .with_in("data")
            .with_in("w")
            .with_in("b")
            .with_out("conv1")
            .with_arg(Argument::named("order").with_s("NCHW"))
            .with_arg(Argument::named("kernel").with_i(1))
            .with_arg(Argument::named("pads").with_ints(vec![0i64, 0, 0, 0]))],
        ..Default::default()
    };
    let model = load_caffe2_from_buffers(
        &predict.encode_to_vec(),
        &init.encode_to_vec(),
        LoadOptions::default(),
    )
    .unwrap();
    assert!(model.predict_layout.is_channel_first());

    let mut importer = Caffe2ImporterBuilder::new(&model, TraceBackend::new())
        .with_input_size(&[2, 2, 2])
        .build();
    importer.create_compiled_model().unwrap();

    let graph = importer.graph().unwrap();
    let w = graph.tensor_id("w").unwrap();
    assert_eq!(graph.operands[w].ty.dimensions, vec![1, 1, 1, 2]);
    assert_eq!(graph.values[&w], TensorData::F32(vec![1.0, 2.0]));
    let conv1 = graph.tensor_id("conv1").unwrap();
    assert_eq!(graph.operands[conv1].ty.dimensions, vec![1, 2, 2, 1]);
}

#[test]
fn missing_init_file() {
    let dir = tempfile::tempdir().unwrap();
    let predict_path = dir.path().join("predict_net.pb");
    fs::write(&predict_path, quantized_nets().0.encode_to_vec()).unwrap();
    assert!(matches!(
        load_caffe2_pair(&predict_path, LoadOptions::default()),
        Err(ModelLoadError::Io(_))
    ));
}
