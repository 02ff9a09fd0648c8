//! Tensor and value types exchanged with inference backends.

use std::fmt;

use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};

use crate::error::InferenceError;
use crate::Result;

/// Element data types a tensor can carry.
///
/// Discriminants follow the ONNX `TensorProto.DataType` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Float32 = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Float64 = 11,
    Uint32 = 12,
    Uint64 = 13,
    BFloat16 = 16,
}

impl ElementKind {
    /// Map an ONNX `DataType` code to an element kind.
    ///
    /// Complex and 8-bit float encodings have no representation here.
    pub fn from_onnx(code: i32) -> Option<Self> {
        let kind = match code {
            1 => ElementKind::Float32,
            2 => ElementKind::Uint8,
            3 => ElementKind::Int8,
            4 => ElementKind::Uint16,
            5 => ElementKind::Int16,
            6 => ElementKind::Int32,
            7 => ElementKind::Int64,
            8 => ElementKind::String,
            9 => ElementKind::Bool,
            10 => ElementKind::Float16,
            11 => ElementKind::Float64,
            12 => ElementKind::Uint32,
            13 => ElementKind::Uint64,
            16 => ElementKind::BFloat16,
            _ => return None,
        };
        Some(kind)
    }

    /// The ONNX `DataType` code of this kind.
    pub fn onnx_code(self) -> i32 {
        self as i32
    }

    /// Size in bytes of one element in `raw_data` encoding, `None` for strings.
    pub fn byte_width(self) -> Option<usize> {
        match self {
            ElementKind::Uint8 | ElementKind::Int8 | ElementKind::Bool => Some(1),
            ElementKind::Uint16
            | ElementKind::Int16
            | ElementKind::Float16
            | ElementKind::BFloat16 => Some(2),
            ElementKind::Float32 | ElementKind::Int32 | ElementKind::Uint32 => Some(4),
            ElementKind::Float64 | ElementKind::Int64 | ElementKind::Uint64 => Some(8),
            ElementKind::String => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Float32 => "float32",
            ElementKind::Float64 => "float64",
            ElementKind::Float16 => "float16",
            ElementKind::BFloat16 => "bfloat16",
            ElementKind::Int8 => "int8",
            ElementKind::Int16 => "int16",
            ElementKind::Int32 => "int32",
            ElementKind::Int64 => "int64",
            ElementKind::Uint8 => "uint8",
            ElementKind::Uint16 => "uint16",
            ElementKind::Uint32 => "uint32",
            ElementKind::Uint64 => "uint64",
            ElementKind::Bool => "bool",
            ElementKind::String => "string",
        };
        f.write_str(name)
    }
}

/// Rust element types that can be stored in a [`TensorData`].
pub trait Element: Clone + fmt::Debug + Sized + 'static {
    /// The element kind this type represents.
    const KIND: ElementKind;

    /// Wrap an array of this element type.
    fn wrap(array: ArrayD<Self>) -> TensorData;

    /// Borrow the array if `data` holds this element type.
    fn unwrap(data: &TensorData) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;

            fn wrap(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }

            fn unwrap(data: &TensorData) -> Option<&ArrayD<Self>> {
                match data {
                    TensorData::$variant(arr) => Some(arr),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(f16, Float16);
impl_element!(bf16, BFloat16);
impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, Uint8);
impl_element!(u16, Uint16);
impl_element!(u32, Uint32);
impl_element!(u64, Uint64);
impl_element!(bool, Bool);
impl_element!(String, String);

/// A dense tensor of any supported element kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Float16(ArrayD<f16>),
    BFloat16(ArrayD<bf16>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
    Uint16(ArrayD<u16>),
    Uint32(ArrayD<u32>),
    Uint64(ArrayD<u64>),
    Bool(ArrayD<bool>),
    String(ArrayD<String>),
}

macro_rules! with_array {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            TensorData::Float32($arr) => $body,
            TensorData::Float64($arr) => $body,
            TensorData::Float16($arr) => $body,
            TensorData::BFloat16($arr) => $body,
            TensorData::Int8($arr) => $body,
            TensorData::Int16($arr) => $body,
            TensorData::Int32($arr) => $body,
            TensorData::Int64($arr) => $body,
            TensorData::Uint8($arr) => $body,
            TensorData::Uint16($arr) => $body,
            TensorData::Uint32($arr) => $body,
            TensorData::Uint64($arr) => $body,
            TensorData::Bool($arr) => $body,
            TensorData::String($arr) => $body,
        }
    };
}

impl TensorData {
    /// Create a tensor from a row-major flat buffer and a shape.
    pub fn from_shape_vec<T: Element>(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let len = data.len();
        let arr = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| {
            InferenceError::InvalidInput(format!(
                "{} elements do not fit shape {:?}: {}",
                len, shape, e
            ))
        })?;
        Ok(T::wrap(arr))
    }

    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        with_array!(self, arr => arr.shape())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_array!(self, arr => arr.len())
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the element kind of the tensor.
    pub fn kind(&self) -> ElementKind {
        match self {
            TensorData::Float32(_) => ElementKind::Float32,
            TensorData::Float64(_) => ElementKind::Float64,
            TensorData::Float16(_) => ElementKind::Float16,
            TensorData::BFloat16(_) => ElementKind::BFloat16,
            TensorData::Int8(_) => ElementKind::Int8,
            TensorData::Int16(_) => ElementKind::Int16,
            TensorData::Int32(_) => ElementKind::Int32,
            TensorData::Int64(_) => ElementKind::Int64,
            TensorData::Uint8(_) => ElementKind::Uint8,
            TensorData::Uint16(_) => ElementKind::Uint16,
            TensorData::Uint32(_) => ElementKind::Uint32,
            TensorData::Uint64(_) => ElementKind::Uint64,
            TensorData::Bool(_) => ElementKind::Bool,
            TensorData::String(_) => ElementKind::String,
        }
    }

    /// Try to get the inner array as element type `T`.
    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::unwrap(self)
    }

    /// Render the element at flat row-major `index`, for diagnostics.
    pub fn element_to_string(&self, index: usize) -> Option<String> {
        with_array!(self, arr => arr.iter().nth(index).map(|v| format!("{:?}", v)))
    }
}

impl<T: Element> From<ArrayD<T>> for TensorData {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

/// A runtime value: a dense tensor, a sequence of values, or an optional value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(TensorData),
    Sequence(Vec<Value>),
    Optional(Option<Box<Value>>),
}

impl Value {
    /// Short name of the value category, for diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Sequence(_) => "sequence",
            Value::Optional(_) => "optional",
        }
    }

    /// Try to borrow the tensor payload.
    pub fn as_tensor(&self) -> Option<&TensorData> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl From<TensorData> for Value {
    fn from(data: TensorData) -> Self {
        Value::Tensor(data)
    }
}
