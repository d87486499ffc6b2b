use std::path::PathBuf;

use nnimport_core::{
    builder::SoftmaxPolicy,
    caffe2::{load_caffe2, load_caffe2_pair, LoadOptions},
    operand::OperandId,
    tensor::TensorData,
};
use nnimport_session::{trace::TraceBackend, Caffe2ImporterBuilder};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "compile")]
pub struct Opt {
    #[structopt(parse(from_os_str), help = "Path to the predict net (*predict*.pb)")]
    pub predict: PathBuf,

    #[structopt(
        long = "init",
        parse(from_os_str),
        help = "Path to the init net. Derived from the predict net path if omitted"
    )]
    pub init: Option<PathBuf>,

    #[structopt(
        long = "input-size",
        help = "Input size as H,W,C",
        use_delimiter = true,
        default_value = "224,224,3"
    )]
    pub input_size: Vec<u32>,

    #[structopt(long = "quantized", help = "Build a quantized graph")]
    pub quantized: bool,

    #[structopt(long = "signed", help = "Remap uint8 weights to int8")]
    pub signed_remap: bool,

    #[structopt(long = "emit-softmax", help = "Emit SOFTMAX instead of aliasing it")]
    pub emit_softmax: bool,

    #[structopt(long = "run", help = "Run one computation on a zero input")]
    pub run: bool,
}

fn main() {
    env_logger::init();
    color_backtrace::install();

    let opt = Opt::from_args();

    let load_opts = LoadOptions::default()
        .with_quantized(opt.quantized)
        .with_signed_remap(opt.signed_remap);
    let model = match &opt.init {
        Some(init) => load_caffe2(&opt.predict, init, load_opts),
        None => load_caffe2_pair(&opt.predict, load_opts),
    }
    .expect("Failed to load model");

    let softmax = if opt.emit_softmax {
        SoftmaxPolicy::Emit
    } else {
        SoftmaxPolicy::Alias
    };
    let backend = TraceBackend::new();
    let mut importer = Caffe2ImporterBuilder::new(&model, backend.clone())
        .with_input_size(&opt.input_size)
        .with_quantized(opt.quantized)
        .with_signed_remap(opt.signed_remap)
        .with_softmax(softmax)
        .build();
    importer
        .create_compiled_model()
        .expect("Failed to compile model");

    let graph = importer.graph().expect("Graph is built");
    println!("{graph}");
    println!("required ops: {:?}", importer.required_ops());
    println!("backend calls: {}", backend.calls().len());

    if opt.run {
        let buffer = |id: OperandId| {
            let ty = &graph.operands[id].ty;
            let len = ty.total_elems();
            match (ty.code.is_quantized(), opt.signed_remap) {
                (true, true) => TensorData::I8(vec![0; len]),
                (true, false) => TensorData::U8(vec![0; len]),
                (false, _) => TensorData::F32(vec![0.0; len]),
            }
        };
        let inputs = graph.inputs.iter().map(|&id| buffer(id)).collect::<Vec<_>>();
        let mut outputs = graph.outputs.iter().map(|&id| buffer(id)).collect::<Vec<_>>();
        importer
            .compute(&inputs, &mut outputs)
            .expect("Inference failed");
        for (i, output) in outputs.iter().enumerate() {
            println!("output {i}: {output}");
        }
    }
}
