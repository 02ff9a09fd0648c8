//! Error types for the zoocheck-core library.

use std::path::PathBuf;

use thiserror::Error;
use zoocheck_inference::{ElementKind, Role};

/// Main error type for conformance checking.
#[derive(Error, Debug)]
pub enum CheckError {
    /// A fixture file could not be mapped to a declared model slot.
    #[error("cannot resolve {role} fixture '{file}' to a model slot{}", fmt_index(.index))]
    SlotResolution {
        file: String,
        role: Role,
        index: Option<usize>,
    },

    /// Actual and expected shapes differ.
    #[error("shape mismatch at {path}: actual {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        path: String,
        actual: Vec<usize>,
        expected: Vec<usize>,
    },

    /// Values differ beyond tolerance, or differ in structure.
    #[error("value mismatch at {path}: {detail}")]
    ValueMismatch { path: String, detail: Mismatch },

    /// The comparator has no rule for this value kind.
    #[error("unsupported value kind at {path}: {kind}")]
    UnsupportedValueKind { path: String, kind: String },

    /// A fixture file is malformed or disagrees with the slot metadata.
    #[error("bad fixture {}: {reason}", .path.display())]
    Fixture { path: PathBuf, reason: String },

    /// No usable model file in a model directory.
    #[error("cannot determine model file in {}: found [{}]", .dir.display(), .found.join(","))]
    ModelFile { dir: PathBuf, found: Vec<String> },

    /// The model produced an output with no expected fixture.
    #[error("no expected fixture for output '{0}'")]
    MissingExpected(String),

    /// The model produced an output it does not declare.
    #[error("model produced undeclared output '{0}'")]
    UnexpectedOutput(String),

    /// Inference error from the backend.
    #[error("inference error: {0}")]
    Inference(#[from] zoocheck_inference::InferenceError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (index {})", i),
        None => String::new(),
    }
}

/// What differed in a [`CheckError::ValueMismatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    /// An element differs beyond the kind's tolerance.
    Element {
        kind: ElementKind,
        index: usize,
        actual: String,
        expected: String,
    },
    /// Element kinds of the two tensors differ.
    Kind {
        actual: ElementKind,
        expected: ElementKind,
    },
    /// Sequence lengths differ.
    Length { actual: usize, expected: usize },
    /// Value categories differ (tensor vs sequence, or present vs absent optional).
    Category {
        actual: &'static str,
        expected: &'static str,
    },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Element {
                kind,
                index,
                actual,
                expected,
            } => write!(
                f,
                "{} element {} is {}, expected {}",
                kind, index, actual, expected
            ),
            Mismatch::Kind { actual, expected } => {
                write!(f, "element kind {}, expected {}", actual, expected)
            }
            Mismatch::Length { actual, expected } => {
                write!(f, "sequence length {}, expected {}", actual, expected)
            }
            Mismatch::Category { actual, expected } => {
                write!(f, "got {}, expected {}", actual, expected)
            }
        }
    }
}

/// Result type for the zoocheck-core library.
pub type Result<T> = std::result::Result<T, CheckError>;
