use std::fmt;

/// Element type of a bulk tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorElemType {
    F32,
    I32,
    U8,
    I8,
}

/// A flat, typed tensor buffer. Shapes live next to it (in operand types or
/// initializer records), never inside.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    U8(Vec<u8>),
    I8(Vec<i8>),
}

pub trait TensorElemTypeExt: PartialEq + Copy + fmt::Debug {
    fn wrap(data: Vec<Self>) -> TensorData;
}

/// Applies `$body` to the vector inside `$data`, rewrapping the result in the
/// same variant.
macro_rules! map_tensor_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::tensor::TensorData::F32($v) => $crate::tensor::TensorData::F32($body),
            $crate::tensor::TensorData::I32($v) => $crate::tensor::TensorData::I32($body),
            $crate::tensor::TensorData::U8($v) => $crate::tensor::TensorData::U8($body),
            $crate::tensor::TensorData::I8($v) => $crate::tensor::TensorData::I8($body),
        }
    };
}

pub(crate) use map_tensor_data;

impl TensorData {
    pub fn new<T: TensorElemTypeExt>(data: Vec<T>) -> Self {
        T::wrap(data)
    }

    pub fn zeros_of_type(ty: TensorElemType, len: usize) -> Self {
        match ty {
            TensorElemType::F32 => Self::F32(vec![0.0; len]),
            TensorElemType::I32 => Self::I32(vec![0; len]),
            TensorElemType::U8 => Self::U8(vec![0; len]),
            TensorElemType::I8 => Self::I8(vec![0; len]),
        }
    }

    pub fn elem_ty(&self) -> TensorElemType {
        match self {
            Self::F32(_) => TensorElemType::F32,
            Self::I32(_) => TensorElemType::I32,
            Self::U8(_) => TensorElemType::U8,
            Self::I8(_) => TensorElemType::I8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Reads element `index` widened to `f64`, whatever the element type.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            Self::F32(v) => v.get(index).map(|&x| x as f64),
            Self::I32(v) => v.get(index).map(|&x| x as f64),
            Self::U8(v) => v.get(index).map(|&x| x as f64),
            Self::I8(v) => v.get(index).map(|&x| x as f64),
        }
    }

    /// Copies `other` into `self` if both have the same type and length.
    pub fn copy_data_from(&mut self, other: &Self) -> bool {
        if self.elem_ty() != other.elem_ty() || self.len() != other.len() {
            return false;
        }
        *self = other.clone();
        true
    }
}

impl TensorElemType {
    pub fn is_f32(&self) -> bool {
        matches!(self, Self::F32)
    }

    pub fn is_i32(&self) -> bool {
        matches!(self, Self::I32)
    }

    pub fn is_u8(&self) -> bool {
        matches!(self, Self::U8)
    }

    pub fn is_i8(&self) -> bool {
        matches!(self, Self::I8)
    }
}

impl fmt::Display for TensorElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TensorElemType::F32 => "float32",
            TensorElemType::I32 => "int32",
            TensorElemType::U8 => "uint8",
            TensorElemType::I8 => "int8",
        })
    }
}

impl TensorElemTypeExt for f32 {
    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::F32(data)
    }
}

impl TensorElemTypeExt for i32 {
    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::I32(data)
    }
}

impl TensorElemTypeExt for u8 {
    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::U8(data)
    }
}

impl TensorElemTypeExt for i8 {
    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::I8(data)
    }
}

impl<T: TensorElemTypeExt> From<Vec<T>> for TensorData {
    fn from(data: Vec<T>) -> Self {
        T::wrap(data)
    }
}

impl fmt::Display for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dump<T: fmt::Debug>(f: &mut fmt::Formatter<'_>, data: &[T]) -> fmt::Result {
            const MAX_ELEMS: usize = 10;
            if data.len() > MAX_ELEMS {
                write!(f, "[")?;
                for e in data[0..MAX_ELEMS / 2].iter() {
                    write!(f, "{e:?}, ")?;
                }
                write!(f, "...")?;
                for e in data[data.len() - MAX_ELEMS / 2..].iter() {
                    write!(f, ", {e:?}")?;
                }
                write!(f, "]")
            } else {
                write!(f, "{data:?}")
            }
        }

        write!(f, "{}({}, ", self.elem_ty(), self.len())?;
        match self {
            TensorData::F32(v) => dump(f, v)?,
            TensorData::I32(v) => dump(f, v)?,
            TensorData::U8(v) => dump(f, v)?,
            TensorData::I8(v) => dump(f, v)?,
        }
        write!(f, ")")
    }
}

#[test]
fn dump_short_tensor() {
    let t = TensorData::new(vec![1i32, -2, 3]);
    insta::assert_snapshot!(t.to_string(), @"int32(3, [1, -2, 3])");
}

#[test]
fn dump_long_tensor() {
    let t = TensorData::new((0u8..12).collect::<Vec<_>>());
    insta::assert_snapshot!(t.to_string(), @"uint8(12, [0, 1, 2, 3, 4, ..., 7, 8, 9, 10, 11])");
}

#[test]
fn test_tensor_elem_type() {
    assert!(TensorElemType::F32.is_f32());
    assert!(TensorElemType::I32.is_i32());
    assert!(TensorElemType::U8.is_u8());
    assert!(TensorElemType::I8.is_i8());
}

#[test]
fn test_tensor_elem_type_ext() {
    assert!(TensorData::new(vec![0f32]).elem_ty().is_f32());
    assert!(TensorData::new(vec![0i32]).elem_ty().is_i32());
    assert!(TensorData::from(vec![0u8]).elem_ty().is_u8());
    assert!(TensorData::from(vec![0i8]).elem_ty().is_i8());
}

#[test]
fn test_zeros_of_type() {
    let t = TensorData::zeros_of_type(TensorElemType::I8, 4);
    assert_eq!(t, TensorData::I8(vec![0; 4]));
    assert_eq!(t.get_f64(3), Some(0.0));
    assert_eq!(t.get_f64(4), None);
}

#[test]
fn test_map_tensor_data() {
    let t = TensorData::new(vec![1.0f32, 2.0, 3.0]);
    let r = map_tensor_data!(t, v => v.into_iter().rev().collect());
    assert_eq!(r, TensorData::new(vec![3.0f32, 2.0, 1.0]));
}

#[test]
fn test_copy_data_from() {
    let mut dst = TensorData::zeros_of_type(TensorElemType::U8, 2);
    assert!(dst.copy_data_from(&TensorData::new(vec![7u8, 9])));
    assert_eq!(dst, TensorData::U8(vec![7, 9]));
    assert!(!dst.copy_data_from(&TensorData::new(vec![7i8, 9])));
    assert!(!dst.copy_data_from(&TensorData::new(vec![1u8])));
}
