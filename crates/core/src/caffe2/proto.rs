//! The subset of `caffe2.proto` the importer reads. Nested tensor and net
//! payloads are kept as opaque bytes: the importer only needs to know they
//! are populated.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Argument {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub f: Option<f32>,
    #[prost(int64, optional, tag = "3")]
    pub i: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub s: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "10")]
    pub t: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub n: Option<Vec<u8>>,
    #[prost(float, repeated, packed = "false", tag = "5")]
    pub floats: Vec<f32>,
    #[prost(int64, repeated, packed = "false", tag = "6")]
    pub ints: Vec<i64>,
    #[prost(bytes = "vec", repeated, tag = "7")]
    pub strings: Vec<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "11")]
    pub tensors: Vec<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "9")]
    pub nets: Vec<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "12")]
    pub qtensors: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperatorDef {
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub r#type: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub arg: Vec<Argument>,
    #[prost(string, optional, tag = "7")]
    pub engine: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetDef {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub op: Vec<OperatorDef>,
    #[prost(string, optional, tag = "3")]
    pub r#type: Option<String>,
    #[prost(message, repeated, tag = "6")]
    pub arg: Vec<Argument>,
    #[prost(string, repeated, tag = "7")]
    pub external_input: Vec<String>,
    #[prost(string, repeated, tag = "8")]
    pub external_output: Vec<String>,
}

impl Argument {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_i(mut self, i: i64) -> Self {
        self.i = Some(i);
        self
    }

    pub fn with_f(mut self, f: f32) -> Self {
        self.f = Some(f);
        self
    }

    pub fn with_s(mut self, s: impl Into<Vec<u8>>) -> Self {
        self.s = Some(s.into());
        self
    }

    pub fn with_ints(mut self, ints: impl Into<Vec<i64>>) -> Self {
        self.ints = ints.into();
        self
    }

    pub fn with_floats(mut self, floats: impl Into<Vec<f32>>) -> Self {
        self.floats = floats.into();
        self
    }
}

impl OperatorDef {
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            r#type: Some(ty.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_in(mut self, name: impl Into<String>) -> Self {
        self.input.push(name.into());
        self
    }

    pub fn with_out(mut self, name: impl Into<String>) -> Self {
        self.output.push(name.into());
        self
    }

    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.arg.push(arg);
        self
    }
}
