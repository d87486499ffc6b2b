use std::time::Instant;

use nnimport_core::{
    builder::{BuildOptions, GraphBuilder, SoftmaxPolicy},
    caffe2::Caffe2Model,
    graph::Graph,
    operation::OperationCode,
    tensor::TensorData,
};

use crate::{
    backend::{Backend, BackendError, Compilation, Execution, Model, ModelOptions, PreferenceCode},
    emit::emit_graph,
    SessionError,
};

type CompilationOf<B> = <<B as Backend>::Model as Model>::Compilation;
type ExecutionOf<B> = <CompilationOf<B> as Compilation>::Execution;

pub struct Caffe2ImporterBuilder<'a, B: Backend> {
    model: &'a Caffe2Model,
    backend: B,
    build_opts: BuildOptions,
    model_opts: ModelOptions,
    preference: PreferenceCode,
}

impl<'a, B: Backend> Caffe2ImporterBuilder<'a, B> {
    pub fn new(model: &'a Caffe2Model, backend: B) -> Self {
        Self {
            model,
            backend,
            build_opts: BuildOptions::default(),
            model_opts: ModelOptions::default(),
            preference: PreferenceCode::default(),
        }
    }

    pub fn with_input_size(mut self, input_size: &[u32]) -> Self {
        self.build_opts = self.build_opts.with_input_size(input_size);
        self
    }

    pub fn with_quantized(mut self, quantized: bool) -> Self {
        self.build_opts = self.build_opts.with_quantized(quantized);
        self
    }

    pub fn with_signed_remap(mut self, signed_remap: bool) -> Self {
        self.build_opts = self.build_opts.with_signed_remap(signed_remap);
        self
    }

    pub fn with_softmax(mut self, softmax: SoftmaxPolicy) -> Self {
        self.build_opts = self.build_opts.with_softmax(softmax);
        self
    }

    pub fn with_preference(mut self, preference: PreferenceCode) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_eager(mut self, eager: bool) -> Self {
        self.model_opts.eager = eager;
        self
    }

    pub fn with_supported_ops(mut self, supported_ops: Vec<OperationCode>) -> Self {
        self.model_opts.supported_ops = supported_ops;
        self
    }

    pub fn build(self) -> Caffe2Importer<'a, B> {
        Caffe2Importer {
            model: self.model,
            backend: self.backend,
            build_opts: self.build_opts,
            model_opts: self.model_opts,
            preference: self.preference,
            graph: None,
            compiled: None,
        }
    }
}

/// Builds a flattened Caffe2 model into a graph, hands it to a backend, and
/// runs it.
pub struct Caffe2Importer<'a, B: Backend> {
    model: &'a Caffe2Model,
    backend: B,
    build_opts: BuildOptions,
    model_opts: ModelOptions,
    preference: PreferenceCode,
    graph: Option<Graph>,
    compiled: Option<Compiled<B>>,
}

struct Compiled<B: Backend> {
    // Kept alive for as long as the execution is.
    _model: B::Model,
    _compilation: CompilationOf<B>,
    execution: ExecutionOf<B>,
}

impl<'a, B: Backend> Caffe2Importer<'a, B> {
    /// Builds the graph, emits it into a new backend model, and compiles it.
    /// Any previously compiled model is dropped first.
    pub fn create_compiled_model(&mut self) -> Result<(), SessionError> {
        self.graph = None;
        self.compiled = None;

        let graph = GraphBuilder::new(self.build_opts.clone()).build(self.model)?;

        let mut model = self.backend.create_model(&self.model_opts)?;
        emit_graph(&graph, &mut model)?;
        model.finish()?;

        let start = Instant::now();
        let mut compilation = model.create_compilation()?;
        compilation.set_preference(self.preference)?;
        compilation.finish()?;
        let execution = compilation.create_execution()?;
        log::info!("compilation: {:?}", start.elapsed());

        self.graph = Some(graph);
        self.compiled = Some(Compiled {
            _model: model,
            _compilation: compilation,
            execution,
        });
        Ok(())
    }

    /// Runs the compiled model. Each of `outputs` must already have the
    /// element type and length of the corresponding model output; results are
    /// copied into them.
    pub fn compute(
        &mut self,
        inputs: &[TensorData],
        outputs: &mut [TensorData],
    ) -> Result<(), SessionError> {
        let execution = &mut self
            .compiled
            .as_mut()
            .ok_or(SessionError::NotCompiled)?
            .execution;

        for (i, input) in inputs.iter().enumerate() {
            execution.set_input(i as u32, input)?;
        }
        for (i, output) in outputs.iter().enumerate() {
            execution.set_output(i as u32, output)?;
        }

        let start = Instant::now();
        execution.start_compute()?;
        log::debug!("compute: {:?}", start.elapsed());

        for (i, output) in outputs.iter_mut().enumerate() {
            let result = execution
                .output(i as u32)
                .ok_or(BackendError::BadIndex(i as u32))?;
            if !output.copy_data_from(result) {
                return Err(SessionError::Message(
                    format!("output {i} does not match its buffer").into(),
                ));
            }
        }

        Ok(())
    }

    /// Operation codes the compiled graph uses, sorted. Empty before
    /// [`Self::create_compiled_model`] succeeds.
    pub fn required_ops(&self) -> Vec<OperationCode> {
        self.graph
            .as_ref()
            .map(Graph::required_ops)
            .unwrap_or_default()
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
