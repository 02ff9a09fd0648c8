//! Mapping of fixture file names to model input/output slots.
//!
//! Fixture files follow the `input_<N>.pb` / `output_<N>.pb` convention where
//! `N` indexes the model's declared slot order. A few published models ship
//! fixtures whose numbering disagrees with their metadata; those are handled
//! by [`SlotOverrides`], which are consulted before the numeric rule.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;
use zoocheck_inference::{ModelSlots, Role, SlotInfo};

use crate::error::{CheckError, Result};

lazy_static! {
    static ref INPUT_FILE: Regex = Regex::new(r"input_(\d+)\.pb").unwrap();
    static ref OUTPUT_FILE: Regex = Regex::new(r"output_(\d+)\.pb").unwrap();
}

fn file_pattern(role: Role) -> &'static Regex {
    match role {
        Role::Input => &*INPUT_FILE,
        Role::Output => &*OUTPUT_FILE,
    }
}

/// Extract the slot index from a fixture file name.
///
/// The name must match the role's pattern exactly once; zero or several
/// matches, or digits that do not fit in `usize`, yield `None`.
pub fn fixture_index(file_name: &str, role: Role) -> Option<usize> {
    let mut matches = file_pattern(role).captures_iter(file_name);
    let caps = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    caps[1].parse().ok()
}

/// Resolve a fixture file to a slot using only the numeric suffix rule.
pub fn match_by_index<'a>(
    file_name: &str,
    slots: &'a ModelSlots,
    role: Role,
) -> Result<&'a SlotInfo> {
    let failure = |index| CheckError::SlotResolution {
        file: file_name.to_string(),
        role,
        index,
    };

    let index = fixture_index(file_name, role).ok_or_else(|| failure(None))?;
    slots.slots(role).get(index).ok_or_else(|| failure(Some(index)))
}

/// An irregular fixture-to-slot mapping for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotOverride {
    /// Every fixture of a role maps to one slot.
    Fixed { input: String, output: String },
    /// Literal file name to literal slot name, per role.
    Table {
        inputs: BTreeMap<String, String>,
        outputs: BTreeMap<String, String>,
    },
}

impl SlotOverride {
    fn slot_name(&self, file_name: &str, role: Role) -> Option<&str> {
        match (self, role) {
            (SlotOverride::Fixed { input, .. }, Role::Input) => Some(input.as_str()),
            (SlotOverride::Fixed { output, .. }, Role::Output) => Some(output.as_str()),
            (SlotOverride::Table { inputs, .. }, Role::Input) => {
                inputs.get(file_name).map(String::as_str)
            }
            (SlotOverride::Table { outputs, .. }, Role::Output) => {
                outputs.get(file_name).map(String::as_str)
            }
        }
    }
}

/// An override bound to a (model, opset) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub model: String,
    pub opset: String,
    #[serde(flatten)]
    pub rule: SlotOverride,
}

/// Overrides keyed by (model, opset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotOverrides {
    entries: Vec<OverrideEntry>,
}

impl Default for SlotOverrides {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SlotOverrides {
    /// No overrides; every file goes through the numeric rule.
    pub fn none() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Overrides for the published models known to need them.
    pub fn builtin() -> Self {
        let table = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(file, slot)| (file.to_string(), slot.to_string()))
                .collect()
        };

        Self::none()
            // Single input/output; fixture numbering differs between data sets.
            .with(
                "keras_prelu_ImageNet_small",
                "opset9",
                SlotOverride::Fixed {
                    input: "p_re_lu_3_input".to_string(),
                    output: "p_re_lu_3/add:0".to_string(),
                },
            )
            // Metadata order: inputs are reversed after the first,
            // outputs are listed as unstack:1, unstack:0, unique_ids:0.
            .with(
                "test_BERT_Squad",
                "opset8",
                SlotOverride::Table {
                    inputs: table(&[
                        ("input_0.pb", "unique_ids_raw_output___9:0"),
                        ("input_1.pb", "input_ids:0"),
                        ("input_2.pb", "input_mask:0"),
                        ("input_3.pb", "segment_ids:0"),
                    ]),
                    outputs: table(&[
                        ("output_0.pb", "unique_ids:0"),
                        ("output_1.pb", "unstack:0"),
                        ("output_2.pb", "unstack:1"),
                    ]),
                },
            )
    }

    /// Add or replace the override for a (model, opset) pair.
    pub fn with(mut self, model: &str, opset: &str, rule: SlotOverride) -> Self {
        self.entries.retain(|e| !(e.model == model && e.opset == opset));
        self.entries.push(OverrideEntry {
            model: model.to_string(),
            opset: opset.to_string(),
            rule,
        });
        self
    }

    /// The override for a (model, opset) pair, if any.
    pub fn find(&self, model: &str, opset: &str) -> Option<&SlotOverride> {
        self.entries
            .iter()
            .find(|e| e.model == model && e.opset == opset)
            .map(|e| &e.rule)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves fixture files to model slots.
#[derive(Debug, Clone, Default)]
pub struct SlotMatcher {
    overrides: SlotOverrides,
}

impl SlotMatcher {
    /// Create a matcher with the given overrides.
    pub fn new(overrides: SlotOverrides) -> Self {
        Self { overrides }
    }

    /// Resolve `file_name` to a slot of `model` at `opset`.
    ///
    /// An override for the pair always wins; a file it does not list is an
    /// error rather than a fallback to the numeric rule.
    pub fn resolve<'a>(
        &self,
        model: &str,
        opset: &str,
        file_name: &str,
        slots: &'a ModelSlots,
        role: Role,
    ) -> Result<&'a SlotInfo> {
        let Some(rule) = self.overrides.find(model, opset) else {
            return match_by_index(file_name, slots, role);
        };

        let slot = rule
            .slot_name(file_name, role)
            .and_then(|name| slots.get(role, name))
            .ok_or_else(|| CheckError::SlotResolution {
                file: file_name.to_string(),
                role,
                index: None,
            })?;

        trace!("{} {}: override maps {} to {}", model, opset, file_name, slot.name);
        Ok(slot)
    }
}
