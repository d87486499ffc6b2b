pub mod builder;
pub mod caffe2;
pub mod graph;
pub mod operand;
pub mod operation;
pub mod tensor;
