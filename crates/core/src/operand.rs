use std::{fmt, ops::Index};

use id_arena::{Arena, Id};

pub type OperandId = Id<Operand>;

/// Operand type codes understood by the execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum OperandCode {
    Float32 = 0,
    Int32 = 1,
    Uint32 = 2,
    TensorFloat32 = 3,
    TensorInt32 = 4,
    TensorQuant8Asymm = 5,
    TensorQuant8SymmPerChannel = 11,
    TensorQuant8AsymmSigned = 14,
}

impl OperandCode {
    pub fn is_quantized(&self) -> bool {
        matches!(
            self,
            Self::TensorQuant8Asymm | Self::TensorQuant8AsymmSigned | Self::TensorQuant8SymmPerChannel
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Float32 => "FLOAT32",
            Self::Int32 => "INT32",
            Self::Uint32 => "UINT32",
            Self::TensorFloat32 => "TENSOR_FLOAT32",
            Self::TensorInt32 => "TENSOR_INT32",
            Self::TensorQuant8Asymm => "TENSOR_QUANT8_ASYMM",
            Self::TensorQuant8SymmPerChannel => "TENSOR_QUANT8_SYMM_PER_CHANNEL",
            Self::TensorQuant8AsymmSigned => "TENSOR_QUANT8_ASYMM_SIGNED",
        }
    }
}

/// Type of an operand. Fixed once the operand is created.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandType {
    pub code: OperandCode,
    pub dimensions: Vec<u32>,
    pub scale: Option<f32>,
    pub zero_point: Option<i32>,
}

impl OperandType {
    pub fn new(code: OperandCode, dimensions: impl Into<Vec<u32>>) -> Self {
        Self {
            code,
            dimensions: dimensions.into(),
            scale: None,
            zero_point: None,
        }
    }

    pub fn scalar(code: OperandCode) -> Self {
        Self::new(code, vec![])
    }

    pub fn with_quant(mut self, scale: f32, zero_point: i32) -> Self {
        self.scale = Some(scale);
        self.zero_point = Some(zero_point);
        self
    }

    pub fn total_elems(&self) -> usize {
        self.dimensions.iter().map(|&d| d as usize).product()
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.code.name(), self.dimensions)?;
        if let (Some(scale), Some(zero_point)) = (self.scale, self.zero_point) {
            write!(f, " scale={scale} zero_point={zero_point}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub name: Option<String>,
    pub ty: OperandType,
}

/// Per-channel quantization parameters of a filter operand.
#[derive(Debug, Clone, PartialEq)]
pub struct PerChannelQuantParams {
    pub channel_dim: u32,
    pub scales: Vec<f32>,
}

/// Operands in creation order. An operand's id is its position, so the ids
/// handed out form the dense range `0..len`.
#[derive(Debug, Default, Clone)]
pub struct OperandArena(Arena<Operand>);

impl OperandArena {
    pub fn new_operand(&mut self, ty: OperandType) -> OperandId {
        self.0.alloc(Operand { name: None, ty })
    }

    pub fn new_operand_named(&mut self, name: impl Into<String>, ty: OperandType) -> OperandId {
        self.0.alloc(Operand {
            name: Some(name.into()),
            ty,
        })
    }

    pub fn get(&self, id: OperandId) -> Option<&Operand> {
        self.0.get(id)
    }

    pub fn contains(&self, id: OperandId) -> bool {
        self.0.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (OperandId, &Operand)> {
        self.0.iter()
    }
}

impl Index<OperandId> for OperandArena {
    type Output = Operand;

    fn index(&self, index: OperandId) -> &Self::Output {
        &self.0[index]
    }
}

#[test]
fn operand_ids_are_dense() {
    let mut arena = OperandArena::default();
    let a = arena.new_operand(OperandType::scalar(OperandCode::Int32));
    let b = arena.new_operand_named(
        "x",
        OperandType::new(OperandCode::TensorFloat32, vec![1, 2, 2, 3]),
    );
    assert_eq!(a.index(), 0);
    assert_eq!(b.index(), 1);
    assert_eq!(arena.len(), 2);
    assert_eq!(arena[b].name.as_deref(), Some("x"));
}

#[test]
fn operand_from_other_arena_is_rejected() {
    let mut arena = OperandArena::default();
    let mut other = OperandArena::default();
    arena.new_operand(OperandType::scalar(OperandCode::Int32));
    let foreign = other.new_operand(OperandType::scalar(OperandCode::Int32));
    assert!(!arena.contains(foreign));
}

#[test]
fn display_operand_type() {
    let ty = OperandType::new(OperandCode::TensorQuant8AsymmSigned, vec![1, 4, 4, 8])
        .with_quant(0.5, -3);
    insta::assert_snapshot!(
        ty.to_string(),
        @"TENSOR_QUANT8_ASYMM_SIGNED[1, 4, 4, 8] scale=0.5 zero_point=-3"
    );
    assert_eq!(ty.total_elems(), 128);
    assert!(ty.code.is_quantized());
}
