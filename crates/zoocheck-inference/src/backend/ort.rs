//! ONNX Runtime (ort) backend for native platforms.

use std::path::Path;
use std::sync::Mutex;

use half::{bf16, f16};
use ndarray::ArrayD;
use ort::memory::Allocator;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::{PrimitiveTensorElementType, TensorElementType};
use ort::value::{DynTensor, DynValue, DynValueTypeMarker, Sequence, Tensor, ValueType};
use tracing::debug;

use crate::error::InferenceError;
use crate::tensor::{Element, ElementKind, TensorData, Value};
use crate::{Dim, InferenceBackend, ModelLoader, ModelSlots, Result, SlotInfo, SlotKind};

/// Session settings used when loading models.
#[derive(Debug, Clone)]
pub struct OrtLoader {
    intra_threads: usize,
    optimize: bool,
}

impl OrtLoader {
    /// Create a loader with default settings.
    pub fn new() -> Self {
        Self {
            intra_threads: 1,
            optimize: true,
        }
    }

    /// Set the number of intra-op threads per session.
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    /// Enable or disable full graph optimization.
    pub fn with_optimization(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
}

impl Default for OrtLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for OrtLoader {
    type Backend = OrtBackend;

    fn load(&self, path: &Path) -> Result<OrtBackend> {
        OrtBackend::from_file(path, self)
    }
}

/// Backend using ONNX Runtime for native inference.
pub struct OrtBackend {
    session: Mutex<Session>,
    slots: ModelSlots,
}

impl OrtBackend {
    /// Load a model from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P, loader: &OrtLoader) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading ONNX model from: {}", path.display());

        let bytes = std::fs::read(path)?;

        Self::from_bytes(&bytes, loader)
    }

    /// Load a model from bytes.
    pub fn from_bytes(bytes: &[u8], loader: &OrtLoader) -> Result<Self> {
        debug!("Loading ONNX model from {} bytes", bytes.len());

        let level = if loader.optimize {
            GraphOptimizationLevel::Level3
        } else {
            GraphOptimizationLevel::Disable
        };

        let session = Session::builder()
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_optimization_level(level)
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_intra_threads(loader.intra_threads)
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .commit_from_memory(bytes)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        let inputs: Vec<SlotInfo> = session
            .inputs()
            .iter()
            .map(|i| SlotInfo::new(i.name(), slot_kind(i.dtype())))
            .collect();

        let outputs: Vec<SlotInfo> = session
            .outputs()
            .iter()
            .map(|o| SlotInfo::new(o.name(), slot_kind(o.dtype())))
            .collect();

        debug!("Model inputs: {:?}", inputs.iter().map(|s| &s.name).collect::<Vec<_>>());
        debug!("Model outputs: {:?}", outputs.iter().map(|s| &s.name).collect::<Vec<_>>());

        Ok(Self {
            session: Mutex::new(session),
            slots: ModelSlots::new(inputs, outputs),
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn run(&self, inputs: &[(&str, Value)]) -> Result<Vec<(String, Value)>> {
        let ort_inputs: Vec<(&str, SessionInputValue<'static>)> = inputs
            .iter()
            .map(|(name, value)| Ok((*name, ort_value(name, value)?.into())))
            .collect::<Result<Vec<_>>>()?;

        let mut session = self.session.lock().map_err(|e| {
            InferenceError::InferenceFailed(format!("Failed to lock session: {}", e))
        })?;

        let outputs = session
            .run(ort_inputs)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let mut results = Vec::with_capacity(outputs.len());

        for (name, value) in outputs.iter() {
            results.push((name.to_string(), extract_value(name, &value)?));
        }

        Ok(results)
    }

    fn slots(&self) -> &ModelSlots {
        &self.slots
    }
}

/// Convert a value into an owned ort value.
///
/// Sequences must hold tensors. A present optional is fed as its contents.
fn ort_value(name: &str, value: &Value) -> Result<DynValue> {
    match value {
        Value::Tensor(tensor) => Ok(ort_tensor(tensor)?.into_dyn()),
        Value::Sequence(items) => {
            let tensors = items
                .iter()
                .map(|item| match item {
                    Value::Tensor(tensor) => ort_tensor(tensor),
                    other => Err(InferenceError::UnsupportedValue(format!(
                        "input '{}' holds a sequence of {}, only tensor items can be fed",
                        name,
                        other.category()
                    ))),
                })
                .collect::<Result<Vec<DynTensor>>>()?;
            Sequence::new(tensors)
                .map(|seq| seq.into_dyn())
                .map_err(|e| InferenceError::InvalidInput(e.to_string()))
        }
        Value::Optional(Some(inner)) => ort_value(name, inner),
        Value::Optional(None) => Err(InferenceError::UnsupportedValue(format!(
            "input '{}' is an empty optional",
            name
        ))),
    }
}

fn ort_tensor(tensor: &TensorData) -> Result<DynTensor> {
    match tensor {
        TensorData::Float32(arr) => primitive_tensor(arr),
        TensorData::Float64(arr) => primitive_tensor(arr),
        TensorData::Float16(arr) => primitive_tensor(arr),
        TensorData::BFloat16(arr) => primitive_tensor(arr),
        TensorData::Int8(arr) => primitive_tensor(arr),
        TensorData::Int16(arr) => primitive_tensor(arr),
        TensorData::Int32(arr) => primitive_tensor(arr),
        TensorData::Int64(arr) => primitive_tensor(arr),
        TensorData::Uint8(arr) => primitive_tensor(arr),
        TensorData::Uint16(arr) => primitive_tensor(arr),
        TensorData::Uint32(arr) => primitive_tensor(arr),
        TensorData::Uint64(arr) => primitive_tensor(arr),
        TensorData::Bool(arr) => primitive_tensor(arr),
        TensorData::String(arr) => {
            let shape: Vec<i64> = arr.shape().iter().map(|&s| s as i64).collect();
            let data: Vec<String> = arr.iter().cloned().collect();
            Tensor::from_string_array((shape, data.as_slice()))
                .map(|t| t.upcast())
                .map_err(|e| InferenceError::InvalidInput(e.to_string()))
        }
    }
}

fn primitive_tensor<T>(arr: &ArrayD<T>) -> Result<DynTensor>
where
    T: PrimitiveTensorElementType + Element,
{
    let shape: Vec<i64> = arr.shape().iter().map(|&s| s as i64).collect();
    let data: Vec<T> = arr.iter().cloned().collect();
    Tensor::from_array((shape, data))
        .map(|t| t.upcast())
        .map_err(|e| InferenceError::InvalidInput(e.to_string()))
}

/// Convert an ort value into a [`Value`], recursing into sequences.
fn extract_value(name: &str, value: &DynValue) -> Result<Value> {
    match value.dtype() {
        ValueType::Tensor { ty, .. } => extract_tensor(name, *ty, value).map(Value::Tensor),
        ValueType::Sequence(_) => {
            let items = value
                .try_extract_sequence::<DynValueTypeMarker>(&Allocator::default())
                .map_err(|e| InferenceError::OutputExtraction(e.to_string()))?;
            items
                .iter()
                .map(|item| extract_value(name, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence)
        }
        other => Err(InferenceError::UnsupportedValue(format!(
            "output '{}' has type {:?}",
            name, other
        ))),
    }
}

fn extract_tensor(name: &str, ty: TensorElementType, value: &DynValue) -> Result<TensorData> {
    match ty {
        TensorElementType::Float32 => extract_primitive::<f32>(value),
        TensorElementType::Float64 => extract_primitive::<f64>(value),
        TensorElementType::Float16 => extract_primitive::<f16>(value),
        TensorElementType::Bfloat16 => extract_primitive::<bf16>(value),
        TensorElementType::Int8 => extract_primitive::<i8>(value),
        TensorElementType::Int16 => extract_primitive::<i16>(value),
        TensorElementType::Int32 => extract_primitive::<i32>(value),
        TensorElementType::Int64 => extract_primitive::<i64>(value),
        TensorElementType::Uint8 => extract_primitive::<u8>(value),
        TensorElementType::Uint16 => extract_primitive::<u16>(value),
        TensorElementType::Uint32 => extract_primitive::<u32>(value),
        TensorElementType::Uint64 => extract_primitive::<u64>(value),
        TensorElementType::Bool => extract_primitive::<bool>(value),
        TensorElementType::String => {
            let (shape_ref, data) = value
                .try_extract_strings()
                .map_err(|e| InferenceError::OutputExtraction(e.to_string()))?;
            let shape: Vec<usize> = shape_ref.iter().map(|&s| s as usize).collect();
            TensorData::from_shape_vec(shape, data)
        }
        other => Err(InferenceError::UnsupportedValue(format!(
            "output '{}' has element type {:?}",
            name, other
        ))),
    }
}

fn extract_primitive<T>(value: &DynValue) -> Result<TensorData>
where
    T: PrimitiveTensorElementType + Element,
{
    let (shape_ref, data) = value
        .try_extract_tensor::<T>()
        .map_err(|e| InferenceError::OutputExtraction(e.to_string()))?;
    let shape: Vec<usize> = shape_ref.iter().map(|&s| s as usize).collect();
    TensorData::from_shape_vec(shape, data.to_vec())
}

fn slot_kind(value_type: &ValueType) -> SlotKind {
    match value_type {
        ValueType::Tensor {
            ty,
            shape,
            dimension_symbols,
        } => match element_kind(*ty) {
            Some(elem) => SlotKind::Tensor {
                elem,
                shape: shape
                    .iter()
                    .enumerate()
                    .map(|(i, &d)| match dimension_symbols.get(i) {
                        _ if d >= 0 => Dim::Fixed(d as usize),
                        Some(symbol) if !symbol.is_empty() => Dim::Symbolic(symbol.to_string()),
                        _ => Dim::Unknown,
                    })
                    .collect(),
            },
            None => SlotKind::Unsupported(format!("{:?}", ty)),
        },
        ValueType::Sequence(inner) => SlotKind::Sequence(Box::new(slot_kind(inner))),
        ValueType::Optional(inner) => SlotKind::Optional(Box::new(slot_kind(inner))),
        ValueType::Map { .. } => SlotKind::Map,
        #[allow(unreachable_patterns)]
        other => SlotKind::Unsupported(format!("{:?}", other)),
    }
}

fn element_kind(ty: TensorElementType) -> Option<ElementKind> {
    let kind = match ty {
        TensorElementType::Float32 => ElementKind::Float32,
        TensorElementType::Float64 => ElementKind::Float64,
        TensorElementType::Float16 => ElementKind::Float16,
        TensorElementType::Bfloat16 => ElementKind::BFloat16,
        TensorElementType::Int8 => ElementKind::Int8,
        TensorElementType::Int16 => ElementKind::Int16,
        TensorElementType::Int32 => ElementKind::Int32,
        TensorElementType::Int64 => ElementKind::Int64,
        TensorElementType::Uint8 => ElementKind::Uint8,
        TensorElementType::Uint16 => ElementKind::Uint16,
        TensorElementType::Uint32 => ElementKind::Uint32,
        TensorElementType::Uint64 => ElementKind::Uint64,
        TensorElementType::Bool => ElementKind::Bool,
        TensorElementType::String => ElementKind::String,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tensor_sequence_through_ort_value() {
        let sequence = Value::Sequence(vec![
            Value::Tensor(TensorData::from_shape_vec(vec![2], vec![1.5f32, -2.0]).unwrap()),
            Value::Tensor(TensorData::from_shape_vec(vec![1, 1], vec![7.0f32]).unwrap()),
        ]);

        let ort = ort_value("seq", &sequence).unwrap();
        assert!(matches!(ort.dtype(), ValueType::Sequence(_)));
        assert_eq!(extract_value("seq", &ort).unwrap(), sequence);
    }

    #[test]
    fn test_nested_sequence_input_is_unsupported() {
        let nested = Value::Sequence(vec![Value::Sequence(Vec::new())]);
        assert!(matches!(
            ort_value("seq", &nested),
            Err(InferenceError::UnsupportedValue(_))
        ));
        assert!(matches!(
            ort_value("opt", &Value::Optional(None)),
            Err(InferenceError::UnsupportedValue(_))
        ));
    }
}
