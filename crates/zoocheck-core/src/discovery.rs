//! Model zoo layout: `<root>/**/opset<N>/<model>/{model.onnx, test_data_set_*}`.

use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use serde::Serialize;
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::error::{CheckError, Result};

/// One model directory of the zoo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCase {
    /// Name of the enclosing `opset*` directory.
    pub opset: String,
    /// Name of the model directory.
    pub model: String,
    /// Path of the model directory.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl ModelCase {
    /// `opset/model`, used in logs and reports.
    pub fn id(&self) -> String {
        format!("{}/{}", self.opset, self.model)
    }

    /// The model file of this case.
    ///
    /// Picks the first `*.onnx` file by name, ignoring AppleDouble `._*` files.
    pub fn model_file(&self) -> Result<PathBuf> {
        let pattern = format!("{}/*.onnx", escaped(&self.dir));
        let mut found: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| CheckError::Config(format!("bad model pattern {}: {}", pattern, e)))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_file())
            .collect();
        found.sort();

        let candidate = found
            .iter()
            .find(|p| !file_name(p).starts_with("._"))
            .cloned();

        candidate.ok_or_else(|| CheckError::ModelFile {
            dir: self.dir.clone(),
            found: found.iter().map(|p| file_name(p)).collect(),
        })
    }

    /// Test data set directories of this case, sorted.
    pub fn test_data_dirs(&self, config: &DiscoveryConfig) -> Result<Vec<PathBuf>> {
        let prefix = config.test_data_prefix_for(&self.model, &self.opset);
        let pattern = format!("{}/{}*", escaped(&self.dir), Pattern::escape(prefix));
        let mut dirs: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| CheckError::Config(format!("bad test data pattern {}: {}", pattern, e)))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }
}

/// Find every model directory under `root`.
///
/// Cases are sorted by opset directory path, then model name.
pub fn discover(root: &Path) -> Result<Vec<ModelCase>> {
    if !root.is_dir() {
        return Err(CheckError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("model zoo root {} is not a directory", root.display()),
        )));
    }

    let pattern = format!("{}/**/opset*", escaped(root));
    let mut opset_dirs: Vec<PathBuf> = glob(&pattern)
        .map_err(|e| CheckError::Config(format!("bad opset pattern {}: {}", pattern, e)))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_dir())
        .collect();
    opset_dirs.sort();
    opset_dirs.dedup();

    let mut cases = Vec::new();
    for opset_dir in &opset_dirs {
        let opset = file_name(opset_dir);
        let mut models: Vec<PathBuf> = std::fs::read_dir(opset_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        models.sort();

        for dir in models {
            cases.push(ModelCase {
                opset: opset.clone(),
                model: file_name(&dir),
                dir,
            });
        }
    }

    debug!(
        "Discovered {} model(s) in {} opset dir(s) under {}",
        cases.len(),
        opset_dirs.len(),
        root.display()
    );
    Ok(cases)
}

fn escaped(path: &Path) -> String {
    Pattern::escape(&path.to_string_lossy())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn zoo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (opset, model) in [
            ("node/opset7", "test_abs"),
            ("node/opset7", "test_add"),
            ("opset9", "LSTM_Seq_lens_unpacked"),
            ("opset9", "squeezenet"),
        ] {
            fs::create_dir_all(root.join(opset).join(model)).unwrap();
        }
        dir
    }

    #[test]
    fn test_discover_nested_opsets() {
        let dir = zoo();
        let cases = discover(dir.path()).unwrap();
        let ids: Vec<String> = cases.iter().map(ModelCase::id).collect();
        assert_eq!(
            ids,
            vec![
                "opset7/test_abs",
                "opset7/test_add",
                "opset9/LSTM_Seq_lens_unpacked",
                "opset9/squeezenet",
            ]
        );
        assert_eq!(cases[0].dir, dir.path().join("node/opset7/test_abs"));
    }

    #[test]
    fn test_discover_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_model_file_ignores_apple_double() {
        let dir = zoo();
        let case = discover(dir.path()).unwrap().remove(3);
        fs::write(case.dir.join("._model.onnx"), b"").unwrap();
        fs::write(case.dir.join("model.onnx"), b"").unwrap();
        assert_eq!(case.model_file().unwrap(), case.dir.join("model.onnx"));
    }

    #[test]
    fn test_model_file_missing() {
        let dir = zoo();
        let case = discover(dir.path()).unwrap().remove(0);
        fs::write(case.dir.join("._model.onnx"), b"").unwrap();
        match case.model_file() {
            Err(CheckError::ModelFile { found, .. }) => assert_eq!(found, vec!["._model.onnx"]),
            other => panic!("expected ModelFile error, got {other:?}"),
        }
    }

    #[test]
    fn test_data_dirs_default_and_override() {
        let dir = zoo();
        let cases = discover(dir.path()).unwrap();
        let config = DiscoveryConfig::default();

        let lstm = &cases[2];
        for name in ["seq_lens_unpacked", "test_data_set_0"] {
            fs::create_dir_all(lstm.dir.join(name)).unwrap();
        }
        assert_eq!(
            lstm.test_data_dirs(&config).unwrap(),
            vec![lstm.dir.join("seq_lens_unpacked")]
        );

        let squeeze = &cases[3];
        for name in ["test_data_set_1", "test_data_set_0"] {
            fs::create_dir_all(squeeze.dir.join(name)).unwrap();
        }
        fs::write(squeeze.dir.join("test_data_notes"), b"").unwrap();
        assert_eq!(
            squeeze.test_data_dirs(&config).unwrap(),
            vec![
                squeeze.dir.join("test_data_set_0"),
                squeeze.dir.join("test_data_set_1"),
            ]
        );
    }
}
