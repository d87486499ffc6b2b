use std::fmt;

use crate::operand::OperandId;

/// Operation codes of the execution backend. Only the codes the importer can
/// emit are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum OperationCode {
    AveragePool2d = 1,
    Conv2d = 3,
    DepthwiseConv2d = 4,
    Softmax = 25,
}

impl OperationCode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AveragePool2d => "AVERAGE_POOL_2D",
            Self::Conv2d => "CONV_2D",
            Self::DepthwiseConv2d => "DEPTHWISE_CONV_2D",
            Self::Softmax => "SOFTMAX",
        }
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Activation fused into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FuseCode {
    None = 0,
    Relu = 1,
    Relu1 = 2,
    Relu6 = 3,
}

impl FuseCode {
    /// Maps a `(bound_max, bound_min)` clamp onto a fused activation.
    pub fn from_bounds(max: f32, min: f32) -> Self {
        if max == 6.0 && min == 0.0 {
            Self::Relu6
        } else if max == 1.0 && min == -1.0 {
            Self::Relu1
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub code: OperationCode,
    pub inputs: Vec<OperandId>,
    pub outputs: Vec<OperandId>,
}

impl Operation {
    pub fn new(code: OperationCode) -> Self {
        Self {
            code,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_in(mut self, id: OperandId) -> Self {
        self.inputs.push(id);
        self
    }

    pub fn with_ins(mut self, mut ids: Vec<OperandId>) -> Self {
        self.inputs.append(&mut ids);
        self
    }

    pub fn with_out(mut self, id: OperandId) -> Self {
        self.outputs.push(id);
        self
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |ids: &[OperandId]| ids.iter().map(|id| id.index()).collect::<Vec<_>>();
        write!(
            f,
            "{} {:?} -> {:?}",
            self.code,
            ids(&self.inputs),
            ids(&self.outputs)
        )
    }
}

#[test]
fn fuse_code_from_bounds() {
    assert_eq!(FuseCode::from_bounds(6.0, 0.0), FuseCode::Relu6);
    assert_eq!(FuseCode::from_bounds(1.0, -1.0), FuseCode::Relu1);
    assert_eq!(FuseCode::from_bounds(0.0, 0.0), FuseCode::None);
    assert_eq!(FuseCode::from_bounds(6.0, -1.0), FuseCode::None);
    assert_eq!(FuseCode::from_bounds(-1.0, 1.0), FuseCode::None);
    assert_eq!(FuseCode::from_bounds(0.0, 6.0), FuseCode::None);
}

#[test]
fn fuse_code_values() {
    assert_eq!(FuseCode::None as i32, 0);
    assert_eq!(FuseCode::Relu as i32, 1);
    assert_eq!(FuseCode::Relu1 as i32, 2);
    assert_eq!(FuseCode::Relu6 as i32, 3);
    assert_eq!(OperationCode::Conv2d as i32, 3);
    assert_eq!(OperationCode::DepthwiseConv2d as i32, 4);
}
