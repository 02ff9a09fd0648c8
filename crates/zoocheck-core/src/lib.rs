//! Core library for ONNX model zoo conformance checking.
//!
//! This crate provides:
//! - fixture file to model slot matching, with per-model override tables
//! - tolerance-aware comparison of tensors, sequences and optionals
//! - ONNX protobuf fixture decoding
//! - model zoo discovery, the exclusion list and the harness driver

pub mod compare;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exclusion;
pub mod fixture;
pub mod harness;
pub mod matcher;

pub use compare::{Comparator, Tolerance};
pub use config::{DiscoveryConfig, ExclusionConfig, HarnessConfig, RuntimeConfig, ToleranceConfig};
pub use discovery::{discover, ModelCase};
pub use error::{CheckError, Mismatch, Result};
pub use exclusion::ExclusionList;
pub use harness::{CaseOutcome, CaseReport, CaseStatus, Harness, RunSummary};
pub use matcher::{SlotMatcher, SlotOverride, SlotOverrides};

/// Re-export inference types.
pub use zoocheck_inference::{
    InferenceBackend, InferenceError, ModelLoader, ModelSlots, Role, SlotInfo, SlotKind,
    TensorData, Value,
};

#[cfg(feature = "native")]
pub use zoocheck_inference::{OrtBackend, OrtLoader};
