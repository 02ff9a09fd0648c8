//! Inference backend implementations.

#[cfg(feature = "native")]
pub mod ort;

use std::path::Path;

use crate::{ModelSlots, Result, Value};

/// Trait for a loaded model that can be run.
///
/// This abstracts over ONNX runtime implementations so the conformance
/// harness can drive a real runtime or an in-process fake the same way.
pub trait InferenceBackend: Send + Sync {
    /// Run inference with the given named inputs.
    ///
    /// # Arguments
    /// * `inputs` - Named input values, one per declared input slot
    ///
    /// # Returns
    /// Named output values produced by the model
    fn run(&self, inputs: &[(&str, Value)]) -> Result<Vec<(String, Value)>>;

    /// Declared input and output slots of the model.
    fn slots(&self) -> &ModelSlots;
}

/// Trait for creating backends from model files.
pub trait ModelLoader: Send + Sync {
    type Backend: InferenceBackend;

    /// Load the model at `path`.
    fn load(&self, path: &Path) -> Result<Self::Backend>;
}
