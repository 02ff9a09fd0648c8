//! Conformance harness: runs every test data set of a model and checks the outputs.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use zoocheck_inference::{
    InferenceBackend, InferenceError, ModelLoader, ModelSlots, Role, SlotInfo, Value,
};

use crate::compare::Comparator;
use crate::config::HarnessConfig;
use crate::discovery::ModelCase;
use crate::error::{CheckError, Result};
use crate::exclusion::ExclusionList;
use crate::fixture::{fixture_files, load_value};
use crate::matcher::SlotMatcher;

/// Runtime message for models stamped with an opset newer than it supports.
const NEWER_OPSET_MARKER: &str =
    "only *guarantees* support for models stamped with official released onnx opset versions";

/// Result of running one model case.
#[derive(Debug)]
pub enum CaseOutcome {
    /// Every data set matched.
    Passed { data_sets: usize },
    /// The case was not run.
    Skipped { reason: String },
    /// The first error hit while running the case.
    Failed { error: CheckError },
}

/// Drives model cases through a loader, the slot matcher and the comparator.
pub struct Harness<L: ModelLoader> {
    loader: L,
    config: HarnessConfig,
    matcher: SlotMatcher,
    comparator: Comparator,
    exclusions: ExclusionList,
}

impl<L: ModelLoader> Harness<L> {
    /// Create a harness from a loader and configuration.
    pub fn new(loader: L, config: HarnessConfig) -> Self {
        let matcher = SlotMatcher::new(config.overrides.clone());
        let comparator = Comparator::new(config.tolerance.clone());
        let exclusions = ExclusionList::from_config(&config.exclusions);
        Self {
            loader,
            config,
            matcher,
            comparator,
            exclusions,
        }
    }

    /// Why `case` would be skipped by the exclusion list.
    pub fn skip_reason(&self, case: &ModelCase) -> Option<Cow<'_, str>> {
        self.exclusions.reason(&case.model)
    }

    /// Run one model case.
    pub fn run_case(&self, case: &ModelCase) -> CaseOutcome {
        if let Some(reason) = self.skip_reason(case) {
            debug!("Skipping {}: {}", case.id(), reason);
            return CaseOutcome::Skipped {
                reason: reason.into_owned(),
            };
        }

        let model_path = match case.model_file() {
            Ok(path) => path,
            Err(error) => return CaseOutcome::Failed { error },
        };

        let backend = match self.loader.load(&model_path) {
            Ok(backend) => backend,
            Err(e) if is_newer_opset(&e) => {
                warn!("Skipping model {}: {}", model_path.display(), e);
                return CaseOutcome::Skipped {
                    reason: "model opset is newer than the runtime supports".to_string(),
                };
            }
            Err(e) => return CaseOutcome::Failed { error: e.into() },
        };

        match self.run_data_sets(case, &backend) {
            Ok(data_sets) => {
                info!("{}: {} data set(s) passed", case.id(), data_sets);
                CaseOutcome::Passed { data_sets }
            }
            Err(error) => CaseOutcome::Failed { error },
        }
    }

    fn run_data_sets(&self, case: &ModelCase, backend: &L::Backend) -> Result<usize> {
        let dirs = case.test_data_dirs(&self.config.discovery)?;
        for dir in &dirs {
            self.check_data_set(case, backend, dir).inspect_err(|e| {
                warn!("{} failed in {}: {}", case.id(), dir.display(), e);
            })?;
        }
        Ok(dirs.len())
    }

    /// Feed one data set's inputs and compare every produced output.
    pub fn check_data_set(&self, case: &ModelCase, backend: &L::Backend, dir: &Path) -> Result<()> {
        let slots = backend.slots();

        let mut inputs: Vec<(&str, Value)> = Vec::new();
        for path in fixture_files(dir, Role::Input)? {
            let slot = self.resolve(case, &path, slots, Role::Input)?;
            inputs.push((slot.name.as_str(), load_value(&path, slot)?));
        }

        let mut expected: BTreeMap<&str, Value> = BTreeMap::new();
        for path in fixture_files(dir, Role::Output)? {
            let slot = self.resolve(case, &path, slots, Role::Output)?;
            expected.insert(slot.name.as_str(), load_value(&path, slot)?);
        }

        debug!(
            "{}: running {} with {} input(s), {} expected output(s)",
            case.id(),
            dir.display(),
            inputs.len(),
            expected.len()
        );
        let produced = backend.run(&inputs)?;

        for (name, actual) in &produced {
            let slot = slots
                .get(Role::Output, name)
                .ok_or_else(|| CheckError::UnexpectedOutput(name.clone()))?;
            let want = expected
                .get(name.as_str())
                .ok_or_else(|| CheckError::MissingExpected(name.clone()))?;
            self.comparator.compare(name, &slot.kind, actual, want)?;
        }
        Ok(())
    }

    fn resolve<'a>(
        &self,
        case: &ModelCase,
        path: &Path,
        slots: &'a ModelSlots,
        role: Role,
    ) -> Result<&'a SlotInfo> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.matcher
            .resolve(&case.model, &case.opset, &file_name, slots, role)
    }
}

fn is_newer_opset(error: &InferenceError) -> bool {
    error.to_string().contains(NEWER_OPSET_MARKER)
}

/// Status of one case in a [`RunSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Skipped,
    Failed,
}

/// One case in a [`RunSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub opset: String,
    pub model: String,
    pub status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_sets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub passed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cases: Vec<CaseReport>,
}

impl RunSummary {
    /// Start a summary stamped with the current time.
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            passed: 0,
            skipped: 0,
            failed: 0,
            cases: Vec::new(),
        }
    }

    /// Add a case outcome.
    pub fn record(&mut self, case: &ModelCase, outcome: &CaseOutcome) {
        let (status, data_sets, detail) = match outcome {
            CaseOutcome::Passed { data_sets } => {
                self.passed += 1;
                (CaseStatus::Passed, Some(*data_sets), None)
            }
            CaseOutcome::Skipped { reason } => {
                self.skipped += 1;
                (CaseStatus::Skipped, None, Some(reason.clone()))
            }
            CaseOutcome::Failed { error } => {
                self.failed += 1;
                (CaseStatus::Failed, None, Some(error.to_string()))
            }
        };
        self.cases.push(CaseReport {
            opset: case.opset.clone(),
            model: case.model.clone(),
            status,
            data_sets,
            detail,
        });
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    /// True when no case failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Failed cases in the order they were recorded.
    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|c| c.status == CaseStatus::Failed)
    }

    /// Write the summary as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CheckError::Config(format!("cannot serialize summary: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
