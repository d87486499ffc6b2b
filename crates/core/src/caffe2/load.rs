use prost::{DecodeError, Message};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

use super::{
    flatten::{flatten, Caffe2Model, LoadOptions},
    proto::NetDef,
};

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Model is invalid: {0}")]
    InvalidModel(#[from] DecodeError),

    #[error("Argument '{name}' must have exactly one populated field, found {populated}")]
    MalformedArgument { name: String, populated: usize },

    #[error("Argument '{name}' has unsupported kind '{kind}'")]
    UnsupportedArgumentKind { name: String, kind: &'static str },

    #[error("Argument '{name}' holds {value}, which does not fit in int32")]
    IntegerOverflow { name: String, value: i64 },

    #[error("Tensor '{0}' is produced by more than one initializer")]
    DuplicateTensorName(String),

    #[error("Initializer '{tensor}' is invalid: {reason}")]
    InvalidInitializer { tensor: String, reason: String },

    #[error("Cannot derive the initializer path from {0:?}")]
    NoInitPath(PathBuf),
}

/// Loads a predict net and its initializer net from disk and flattens them.
pub fn load_caffe2(
    predict_path: impl AsRef<Path>,
    init_path: impl AsRef<Path>,
    opts: LoadOptions,
) -> Result<Caffe2Model, ModelLoadError> {
    let predict = load_net_def(predict_path)?;
    let init = load_net_def(init_path)?;
    flatten(&predict, &init, opts)
}

/// Like [`load_caffe2`], locating the initializer next to the predict net
/// (`*predict*.pb` -> `*init*.pb`).
pub fn load_caffe2_pair(
    predict_path: impl AsRef<Path>,
    opts: LoadOptions,
) -> Result<Caffe2Model, ModelLoadError> {
    let predict_path = predict_path.as_ref();
    let init_path = init_path_for(predict_path)
        .ok_or_else(|| ModelLoadError::NoInitPath(predict_path.to_owned()))?;
    load_caffe2(predict_path, init_path, opts)
}

pub fn load_caffe2_from_buffers(
    predict: &[u8],
    init: &[u8],
    opts: LoadOptions,
) -> Result<Caffe2Model, ModelLoadError> {
    let predict = NetDef::decode(predict)?;
    let init = NetDef::decode(init)?;
    flatten(&predict, &init, opts)
}

pub fn load_net_def(path: impl AsRef<Path>) -> Result<NetDef, ModelLoadError> {
    Ok(NetDef::decode(&*fs::read(path)?)?)
}

/// Replaces the last `predict` in the file name with `init`.
pub fn init_path_for(predict_path: &Path) -> Option<PathBuf> {
    let file_name = predict_path.file_name()?.to_str()?;
    let at = file_name.rfind("predict")?;
    let init_name = format!(
        "{}init{}",
        &file_name[..at],
        &file_name[at + "predict".len()..]
    );
    Some(predict_path.with_file_name(init_name))
}

#[test]
fn derive_init_path() {
    assert_eq!(
        init_path_for(Path::new("models/squeezenet/predict_net.pb")),
        Some(PathBuf::from("models/squeezenet/init_net.pb"))
    );
    assert_eq!(
        init_path_for(Path::new("/m/mobilenet_predict.pb")),
        Some(PathBuf::from("/m/mobilenet_init.pb"))
    );
    assert_eq!(init_path_for(Path::new("model.pb")), None);
}

#[test]
fn load_garbage_buffer() {
    assert!(matches!(
        load_caffe2_from_buffers(&[0xff, 0xff, 0xff], &[], LoadOptions::default()),
        Err(ModelLoadError::InvalidModel(_))
    ));
}
