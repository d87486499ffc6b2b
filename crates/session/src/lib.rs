pub mod backend;
pub mod emit;
pub mod importer;
pub mod trace;

use std::borrow::Cow;

use nnimport_core::{builder::BuildError, caffe2::ModelLoadError};
use thiserror::Error;

pub use backend::BackendError;
pub use emit::emit_graph;
pub use importer::{Caffe2Importer, Caffe2ImporterBuilder};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Load: {0}")]
    Load(#[from] ModelLoadError),

    #[error("Build: {0}")]
    Build(#[from] BuildError),

    #[error("Backend: {0}")]
    Backend(#[from] BackendError),

    #[error("Model is not compiled yet")]
    NotCompiled,

    /// The backend numbered an operand differently from the graph.
    #[error("Backend returned operand index {actual}, expected {expected}")]
    OperandIdMismatch { expected: usize, actual: u32 },

    /// General error messages.
    #[error("Something went wrong: {0}")]
    Message(Cow<'static, str>),
}
