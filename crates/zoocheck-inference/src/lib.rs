//! Value model and inference backends for zoocheck.
//!
//! This crate provides:
//! - a tagged-union [`Value`] (tensor, sequence, optional) backed by `ndarray`
//! - model slot metadata ([`SlotInfo`], [`ModelSlots`]) as reported by a runtime
//! - the [`InferenceBackend`] / [`ModelLoader`] seam the conformance harness runs against
//! - an ONNX Runtime backend (`ort`) behind the `native` feature

mod backend;
mod error;
mod slot;
mod tensor;

pub use backend::{InferenceBackend, ModelLoader};
pub use error::InferenceError;
pub use slot::{Dim, ModelSlots, Role, SlotInfo, SlotKind};
pub use tensor::{Element, ElementKind, TensorData, Value};

#[cfg(feature = "native")]
pub use backend::ort::{OrtBackend, OrtLoader};

/// Result type for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
