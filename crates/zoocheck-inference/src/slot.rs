//! Model input/output slot metadata.

use std::fmt;

use crate::tensor::ElementKind;

/// Whether a slot or fixture file belongs to the model inputs or outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Input,
    Output,
}

impl Role {
    /// Lowercase name, also the fixture file prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Output => "output",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared tensor dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    /// Named by the model, e.g. `batch_size`, and bound at run time.
    Symbolic(String),
    /// Unknown until run time.
    Unknown,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Symbolic(name) => f.write_str(name),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

/// The declared value kind of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotKind {
    Tensor { elem: ElementKind, shape: Vec<Dim> },
    Sequence(Box<SlotKind>),
    Optional(Box<SlotKind>),
    Map,
    /// A type the runtime reported that has no counterpart here.
    Unsupported(String),
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Tensor { elem, shape } => {
                let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
                write!(f, "tensor<{}>[{}]", elem, dims.join(","))
            }
            SlotKind::Sequence(inner) => write!(f, "seq<{}>", inner),
            SlotKind::Optional(inner) => write!(f, "optional<{}>", inner),
            SlotKind::Map => f.write_str("map"),
            SlotKind::Unsupported(name) => write!(f, "unsupported<{}>", name),
        }
    }
}

/// A named input or output position of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: String,
    pub kind: SlotKind,
}

impl SlotInfo {
    pub fn new(name: impl Into<String>, kind: SlotKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Convenience constructor for a plain tensor slot.
    pub fn tensor(name: impl Into<String>, elem: ElementKind, shape: &[usize]) -> Self {
        Self::new(
            name,
            SlotKind::Tensor {
                elem,
                shape: shape.iter().map(|&d| Dim::Fixed(d)).collect(),
            },
        )
    }
}

/// Ordered input and output slots of a loaded model.
///
/// Names are unique within each list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSlots {
    pub inputs: Vec<SlotInfo>,
    pub outputs: Vec<SlotInfo>,
}

impl ModelSlots {
    pub fn new(inputs: Vec<SlotInfo>, outputs: Vec<SlotInfo>) -> Self {
        Self { inputs, outputs }
    }

    /// Slots for the given role, in declaration order.
    pub fn slots(&self, role: Role) -> &[SlotInfo] {
        match role {
            Role::Input => &self.inputs,
            Role::Output => &self.outputs,
        }
    }

    /// Look up a slot by name.
    pub fn get(&self, role: Role, name: &str) -> Option<&SlotInfo> {
        self.slots(role).iter().find(|s| s.name == name)
    }
}
