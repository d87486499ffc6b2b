use std::fmt;

use super::{proto::Argument, ModelLoadError};
use crate::tensor::TensorData;

/// A decoded operator argument.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Data(TensorData),
    /// Byte arguments that are semantically text (e.g. `order`).
    Str(String),
}

impl TypedValue {
    pub fn as_data(&self) -> Option<&TensorData> {
        match self {
            Self::Data(data) => Some(data),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Data(_) => None,
        }
    }

    pub fn ints(&self) -> Option<&[i32]> {
        self.as_data().and_then(TensorData::as_i32)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Data(data) => data.len(),
            Self::Str(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single int32 value of a scalar argument.
    pub fn scalar_i32(&self) -> Option<i32> {
        match self.ints()? {
            [x] => Some(*x),
            _ => None,
        }
    }

    /// The single value of a scalar argument of any numeric type, as `f32`.
    pub fn scalar_f32(&self) -> Option<f32> {
        let data = self.as_data()?;
        (data.len() == 1)
            .then(|| data.get_f64(0))
            .flatten()
            .map(|x| x as f32)
    }
}

impl From<TensorData> for TypedValue {
    fn from(data: TensorData) -> Self {
        Self::Data(data)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(data) => write!(f, "{data}"),
            Self::Str(s) => write!(f, "str({s:?})"),
        }
    }
}

/// Decodes the one populated payload field of `arg`.
///
/// `i`/`ints` become int32, `f`/`floats` float32, and `s` uint8 (one element
/// per byte). Scalars are returned as one-element arrays.
pub fn decode_argument(arg: &Argument) -> Result<TypedValue, ModelLoadError> {
    let name = arg.name.as_deref().unwrap_or_default();

    let mut populated = Vec::new();
    if arg.i.is_some() {
        populated.push("i");
    }
    if arg.f.is_some() {
        populated.push("f");
    }
    if arg.s.is_some() {
        populated.push("s");
    }
    if !arg.ints.is_empty() {
        populated.push("ints");
    }
    if !arg.floats.is_empty() {
        populated.push("floats");
    }
    if !arg.strings.is_empty() {
        populated.push("strings");
    }
    if arg.t.is_some() {
        populated.push("t");
    }
    if arg.n.is_some() {
        populated.push("n");
    }
    if !arg.tensors.is_empty() {
        populated.push("tensors");
    }
    if !arg.nets.is_empty() {
        populated.push("nets");
    }
    if !arg.qtensors.is_empty() {
        populated.push("qtensors");
    }

    let kind = match populated.as_slice() {
        [kind] => *kind,
        _ => {
            return Err(ModelLoadError::MalformedArgument {
                name: name.to_owned(),
                populated: populated.len(),
            })
        }
    };

    let to_i32 = |x: i64| {
        i32::try_from(x).map_err(|_| ModelLoadError::IntegerOverflow {
            name: name.to_owned(),
            value: x,
        })
    };

    let data = match kind {
        "i" => TensorData::I32(vec![to_i32(arg.i.unwrap_or_default())?]),
        "ints" => TensorData::I32(
            arg.ints
                .iter()
                .map(|&x| to_i32(x))
                .collect::<Result<_, _>>()?,
        ),
        "f" => TensorData::F32(vec![arg.f.unwrap_or_default()]),
        "floats" => TensorData::F32(arg.floats.clone()),
        "s" => TensorData::U8(arg.s.clone().unwrap_or_default()),
        kind => {
            return Err(ModelLoadError::UnsupportedArgumentKind {
                name: name.to_owned(),
                kind,
            })
        }
    };

    Ok(TypedValue::Data(data))
}

/// Reassembles a byte argument into text, one character per byte.
pub fn bytes_to_string(value: &TypedValue) -> Option<String> {
    match value {
        TypedValue::Data(TensorData::U8(bytes)) => {
            Some(bytes.iter().map(|&b| char::from(b)).collect())
        }
        TypedValue::Str(s) => Some(s.clone()),
        _ => None,
    }
}

#[test]
fn decode_ints() {
    let arg = Argument::named("strides").with_ints(vec![2, 1]);
    assert_eq!(
        decode_argument(&arg).unwrap(),
        TypedValue::Data(TensorData::I32(vec![2, 1]))
    );
}

#[test]
fn decode_scalar_int() {
    let arg = Argument::named("group").with_i(32);
    let value = decode_argument(&arg).unwrap();
    assert_eq!(value.scalar_i32(), Some(32));
    assert_eq!(value.scalar_f32(), Some(32.0));
}

#[test]
fn decode_scalar_float() {
    let arg = Argument::named("Y_scale").with_f(0.25);
    let value = decode_argument(&arg).unwrap();
    assert_eq!(value.as_data(), Some(&TensorData::F32(vec![0.25])));
    assert_eq!(value.scalar_i32(), None);
}

#[test]
fn decode_bytes() {
    let arg = Argument::named("values").with_s(vec![0u8, 128, 255]);
    assert_eq!(
        decode_argument(&arg).unwrap(),
        TypedValue::Data(TensorData::U8(vec![0, 128, 255]))
    );
}

#[test]
fn decode_order_string() {
    let arg = Argument::named("order").with_s("NCHW");
    let value = decode_argument(&arg).unwrap();
    assert_eq!(bytes_to_string(&value).as_deref(), Some("NCHW"));
}

#[test]
fn decode_empty_argument() {
    let arg = Argument::named("nothing");
    assert!(matches!(
        decode_argument(&arg),
        Err(ModelLoadError::MalformedArgument { populated: 0, .. })
    ));
}

#[test]
fn decode_multiple_fields() {
    let arg = Argument::named("both").with_i(1).with_floats(vec![1.0]);
    assert!(matches!(
        decode_argument(&arg),
        Err(ModelLoadError::MalformedArgument { populated: 2, .. })
    ));
}

#[test]
fn decode_strings_is_unsupported() {
    let mut arg = Argument::named("names");
    arg.strings = vec![b"a".to_vec()];
    assert!(matches!(
        decode_argument(&arg),
        Err(ModelLoadError::UnsupportedArgumentKind { kind: "strings", .. })
    ));
}

#[test]
fn decode_int_overflow() {
    let arg = Argument::named("big").with_ints(vec![1, i64::MAX]);
    assert!(matches!(
        decode_argument(&arg),
        Err(ModelLoadError::IntegerOverflow { .. })
    ));
}
