//! Loading of serialized ONNX test fixtures.
//!
//! Fixtures are protobuf-encoded `TensorProto`, `SequenceProto` or
//! `OptionalProto` messages. Which message a file holds is not recorded in
//! the file, so the declared slot kind decides how it is decoded.

use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use half::{bf16, f16};
use prost::Message;
use tracing::debug;
use zoocheck_inference::{Element, ElementKind, Role, SlotInfo, SlotKind, TensorData, Value};

use crate::error::{CheckError, Result};

/// Protobuf message definitions for the subset of `onnx.proto` fixtures use.
pub mod proto {
    /// `onnx.TensorProto`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TensorProto {
        #[prost(int64, repeated, tag = "1")]
        pub dims: Vec<i64>,
        #[prost(int32, tag = "2")]
        pub data_type: i32,
        #[prost(float, repeated, tag = "4")]
        pub float_data: Vec<f32>,
        #[prost(int32, repeated, tag = "5")]
        pub int32_data: Vec<i32>,
        #[prost(bytes = "vec", repeated, tag = "6")]
        pub string_data: Vec<Vec<u8>>,
        #[prost(int64, repeated, tag = "7")]
        pub int64_data: Vec<i64>,
        #[prost(string, tag = "8")]
        pub name: String,
        #[prost(bytes = "vec", tag = "9")]
        pub raw_data: Vec<u8>,
        #[prost(double, repeated, tag = "10")]
        pub double_data: Vec<f64>,
        #[prost(uint64, repeated, tag = "11")]
        pub uint64_data: Vec<u64>,
        #[prost(int32, tag = "14")]
        pub data_location: i32,
    }

    /// `onnx.SequenceProto`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct SequenceProto {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub elem_type: i32,
        #[prost(message, repeated, tag = "3")]
        pub tensor_values: Vec<TensorProto>,
        #[prost(message, repeated, tag = "5")]
        pub sequence_values: Vec<SequenceProto>,
        #[prost(message, repeated, tag = "7")]
        pub optional_values: Vec<OptionalProto>,
    }

    /// `onnx.OptionalProto`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct OptionalProto {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub elem_type: i32,
        #[prost(message, optional, tag = "3")]
        pub tensor_value: Option<TensorProto>,
        #[prost(message, optional, boxed, tag = "5")]
        pub sequence_value: Option<Box<SequenceProto>>,
        #[prost(message, optional, boxed, tag = "7")]
        pub optional_value: Option<Box<OptionalProto>>,
    }

    /// `SequenceProto.DataType` / `OptionalProto.DataType` values.
    pub mod elem_type {
        pub const UNDEFINED: i32 = 0;
        pub const TENSOR: i32 = 1;
        pub const SEQUENCE: i32 = 3;
        pub const OPTIONAL: i32 = 5;
    }

    /// `TensorProto.DataLocation::EXTERNAL`.
    pub const DATA_LOCATION_EXTERNAL: i32 = 1;
}

use proto::{OptionalProto, SequenceProto, TensorProto};

/// Fixture files of one role in a test data directory, sorted by name.
pub fn fixture_files(dir: &Path, role: Role) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}_*.pb",
        Pattern::escape(&dir.to_string_lossy()),
        role.as_str()
    );
    let mut files: Vec<PathBuf> = glob(&pattern)
        .map_err(|e| CheckError::Config(format!("bad fixture pattern {}: {}", pattern, e)))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Load a fixture file as a value of the slot's declared kind.
pub fn load_value(path: &Path, slot: &SlotInfo) -> Result<Value> {
    let bytes = std::fs::read(path)?;
    debug!("Loading fixture {} for slot '{}' ({})", path.display(), slot.name, slot.kind);
    decode_value(&bytes, &slot.kind).map_err(|reason| CheckError::Fixture {
        path: path.to_path_buf(),
        reason,
    })
}

/// Decode fixture bytes as a value of the given kind.
pub fn decode_value(bytes: &[u8], kind: &SlotKind) -> std::result::Result<Value, String> {
    match kind {
        SlotKind::Tensor { elem, .. } => {
            let tensor = TensorProto::decode(bytes).map_err(|e| e.to_string())?;
            tensor_from_proto(&tensor, *elem).map(Value::Tensor)
        }
        SlotKind::Sequence(inner) => {
            let seq = SequenceProto::decode(bytes).map_err(|e| e.to_string())?;
            sequence_from_proto(&seq, inner)
        }
        SlotKind::Optional(inner) => {
            let opt = OptionalProto::decode(bytes).map_err(|e| e.to_string())?;
            optional_from_proto(&opt, inner)
        }
        SlotKind::Map | SlotKind::Unsupported(_) => {
            Err(format!("no fixture decoding for {}", kind))
        }
    }
}

fn sequence_from_proto(
    seq: &SequenceProto,
    inner: &SlotKind,
) -> std::result::Result<Value, String> {
    let items = match inner {
        SlotKind::Tensor { elem, .. } => seq
            .tensor_values
            .iter()
            .map(|t| tensor_from_proto(t, *elem).map(Value::Tensor))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SlotKind::Sequence(next) => seq
            .sequence_values
            .iter()
            .map(|s| sequence_from_proto(s, next))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SlotKind::Optional(next) => seq
            .optional_values
            .iter()
            .map(|o| optional_from_proto(o, next))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        other => return Err(format!("sequence of {} is not supported", other)),
    };
    Ok(Value::Sequence(items))
}

fn optional_from_proto(
    opt: &OptionalProto,
    inner: &SlotKind,
) -> std::result::Result<Value, String> {
    let value = match (opt.elem_type, inner) {
        (proto::elem_type::UNDEFINED, _) => None,
        (proto::elem_type::TENSOR, SlotKind::Tensor { elem, .. }) => opt
            .tensor_value
            .as_ref()
            .map(|t| tensor_from_proto(t, *elem).map(Value::Tensor))
            .transpose()?,
        (proto::elem_type::SEQUENCE, SlotKind::Sequence(next)) => opt
            .sequence_value
            .as_deref()
            .map(|s| sequence_from_proto(s, next))
            .transpose()?,
        (proto::elem_type::OPTIONAL, SlotKind::Optional(next)) => opt
            .optional_value
            .as_deref()
            .map(|o| optional_from_proto(o, next))
            .transpose()?,
        (code, other) => {
            return Err(format!(
                "optional element type {} does not match declared {}",
                code, other
            ));
        }
    };
    Ok(Value::Optional(value.map(Box::new)))
}

/// Convert a decoded `TensorProto` into tensor data of the expected kind.
pub fn tensor_from_proto(
    proto: &TensorProto,
    expected: ElementKind,
) -> std::result::Result<TensorData, String> {
    let actual = ElementKind::from_onnx(proto.data_type)
        .ok_or_else(|| format!("unsupported tensor data type {}", proto.data_type))?;
    if actual != expected {
        return Err(format!(
            "tensor '{}' holds {}, slot declares {}",
            proto.name, actual, expected
        ));
    }
    if proto.data_location == proto::DATA_LOCATION_EXTERNAL {
        return Err(format!("tensor '{}' uses external data", proto.name));
    }

    let shape = proto
        .dims
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| format!("negative dimension {}", d)))
        .collect::<std::result::Result<Vec<usize>, _>>()?;
    let count = element_count(&shape)?;

    let raw = if proto.raw_data.is_empty() {
        None
    } else {
        Some(proto.raw_data.as_slice())
    };
    if let Some(raw) = raw {
        let width = expected
            .byte_width()
            .ok_or_else(|| format!("{} tensors cannot use raw_data", expected))?;
        let needed = count
            .checked_mul(width)
            .ok_or_else(|| format!("dims {:?} are too large", shape))?;
        if raw.len() != needed {
            return Err(format!(
                "raw_data holds {} bytes, dims {:?} of {} need {}",
                raw.len(),
                shape,
                expected,
                needed
            ));
        }
    }

    match expected {
        ElementKind::Float32 => build(
            shape,
            count,
            from_raw(raw, f32::from_le_bytes).unwrap_or_else(|| proto.float_data.clone()),
        ),
        ElementKind::Float64 => build(
            shape,
            count,
            from_raw(raw, f64::from_le_bytes).unwrap_or_else(|| proto.double_data.clone()),
        ),
        ElementKind::Int32 => build(
            shape,
            count,
            from_raw(raw, i32::from_le_bytes).unwrap_or_else(|| proto.int32_data.clone()),
        ),
        ElementKind::Int64 => build(
            shape,
            count,
            from_raw(raw, i64::from_le_bytes).unwrap_or_else(|| proto.int64_data.clone()),
        ),
        ElementKind::Uint64 => build(
            shape,
            count,
            from_raw(raw, u64::from_le_bytes).unwrap_or_else(|| proto.uint64_data.clone()),
        ),
        ElementKind::Uint32 => build(
            shape,
            count,
            from_raw(raw, u32::from_le_bytes)
                .unwrap_or_else(|| proto.uint64_data.iter().map(|&v| v as u32).collect()),
        ),
        ElementKind::Int8 => build(
            shape,
            count,
            from_raw(raw, i8::from_le_bytes)
                .unwrap_or_else(|| proto.int32_data.iter().map(|&v| v as i8).collect()),
        ),
        ElementKind::Int16 => build(
            shape,
            count,
            from_raw(raw, i16::from_le_bytes)
                .unwrap_or_else(|| proto.int32_data.iter().map(|&v| v as i16).collect()),
        ),
        ElementKind::Uint8 => build(
            shape,
            count,
            from_raw(raw, u8::from_le_bytes)
                .unwrap_or_else(|| proto.int32_data.iter().map(|&v| v as u8).collect()),
        ),
        ElementKind::Uint16 => build(
            shape,
            count,
            from_raw(raw, u16::from_le_bytes)
                .unwrap_or_else(|| proto.int32_data.iter().map(|&v| v as u16).collect()),
        ),
        ElementKind::Bool => build(
            shape,
            count,
            from_raw(raw, |b: [u8; 1]| b[0] != 0)
                .unwrap_or_else(|| proto.int32_data.iter().map(|&v| v != 0).collect()),
        ),
        ElementKind::Float16 => build(
            shape,
            count,
            from_raw(raw, f16::from_le_bytes).unwrap_or_else(|| {
                proto.int32_data.iter().map(|&v| f16::from_bits(v as u16)).collect()
            }),
        ),
        ElementKind::BFloat16 => build(
            shape,
            count,
            from_raw(raw, bf16::from_le_bytes).unwrap_or_else(|| {
                proto.int32_data.iter().map(|&v| bf16::from_bits(v as u16)).collect()
            }),
        ),
        ElementKind::String => {
            let data = proto
                .string_data
                .iter()
                .map(|b| String::from_utf8(b.clone()).map_err(|e| e.to_string()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            build(shape, count, data)
        }
    }
}

/// Number of elements `shape` describes, failing instead of overflowing.
fn element_count(shape: &[usize]) -> std::result::Result<usize, String> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| format!("dims {:?} are too large", shape))
}

/// Decode little-endian fixed-width elements; `None` when there is no raw data.
///
/// The caller checks that `raw` holds a whole number of elements.
fn from_raw<T, const N: usize>(
    raw: Option<&[u8]>,
    decode: impl Fn([u8; N]) -> T,
) -> Option<Vec<T>> {
    let raw = raw?;
    Some(
        raw.chunks_exact(N)
            .map(|chunk| {
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(chunk);
                decode(bytes)
            })
            .collect(),
    )
}

fn build<T: Element>(
    shape: Vec<usize>,
    count: usize,
    data: Vec<T>,
) -> std::result::Result<TensorData, String> {
    if data.len() != count {
        return Err(format!(
            "{} elements present, dims {:?} need {}",
            data.len(),
            shape,
            count
        ));
    }
    TensorData::from_shape_vec(shape, data).map_err(|e| e.to_string())
}
