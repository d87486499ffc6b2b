//! Reading Caffe2 predict/init net pairs into a flat operator list.

pub mod attr;
pub mod flatten;
pub mod layout;
pub mod load;
pub mod proto;

pub use flatten::{flatten, Caffe2Model, FlatOperator, LoadOptions, TensorRecord};
pub use load::{load_caffe2, load_caffe2_from_buffers, load_caffe2_pair, ModelLoadError};
