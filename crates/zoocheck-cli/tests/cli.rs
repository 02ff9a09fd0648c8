use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn zoocheck() -> Command {
    let mut cmd = Command::cargo_bin("zoocheck").unwrap();
    cmd.env_remove("DisableContribOps").env_remove("DisableMlOps");
    cmd
}

fn zoo(models: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (opset, model) in models {
        let model_dir = dir.path().join(opset).join(model);
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(model_dir.join("model.onnx"), b"").unwrap();
    }
    dir
}

fn config_arg(dir: &Path) -> String {
    dir.join("config.json").to_string_lossy().into_owned()
}

#[test]
fn test_help_lists_subcommands() {
    zoocheck()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_show_defaults() {
    let dir = TempDir::new().unwrap();
    zoocheck()
        .args(["--config", &config_arg(dir.path()), "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"reduced_precision_ulps\": 2"))
        .stdout(predicate::str::contains("test_BERT_Squad"));
}

#[test]
fn test_config_init_set_get() {
    let dir = TempDir::new().unwrap();
    let config = config_arg(dir.path());

    zoocheck()
        .args(["--config", &config, "config", "init"])
        .assert()
        .success();
    assert!(dir.path().join("config.json").exists());

    zoocheck()
        .args(["--config", &config, "config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    zoocheck()
        .args(["--config", &config, "config", "set", "tolerance.reduced_precision_ulps", "4"])
        .assert()
        .success();

    zoocheck()
        .args(["--config", &config, "config", "get", "tolerance.reduced_precision_ulps"])
        .assert()
        .success()
        .stdout(predicate::str::diff("4\n"));

    zoocheck()
        .args(["--config", &config, "config", "get", "tolerance.nope"])
        .assert()
        .failure();
}

#[test]
fn test_list_runnable_and_skipped() {
    let root = zoo(&[
        ("opset9", "squeezenet"),
        ("opset9", "resnet50_int8"),
        ("opset10", "mxnet_arcface"),
    ]);
    let dir = TempDir::new().unwrap();
    let config = config_arg(dir.path());
    zoocheck().args(["--config", &config, "config", "init"]).assert().success();

    zoocheck()
        .args(["--config", &config, "list"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("opset9/squeezenet\n"));

    zoocheck()
        .args(["--config", &config, "list", "--skipped"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("opset10/mxnet_arcface"))
        .stdout(predicate::str::contains("opset9/resnet50_int8"))
        .stdout(predicate::str::contains("squeezenet").not());
}

#[test]
fn test_run_with_only_excluded_models() {
    let root = zoo(&[("opset9", "resnet50_int8")]);
    let dir = TempDir::new().unwrap();
    let config = config_arg(dir.path());
    zoocheck().args(["--config", &config, "config", "init"]).assert().success();
    let report = dir.path().join("report.json");

    zoocheck()
        .args(["--config", &config, "run", "--report"])
        .arg(&report)
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 passed, 1 skipped, 0 failed"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["skipped"], 1);
    assert_eq!(json["cases"][0]["status"], "skipped");
}

#[test]
fn test_run_empty_zoo_fails() {
    let root = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    let config = config_arg(dir.path());
    zoocheck().args(["--config", &config, "config", "init"]).assert().success();

    zoocheck()
        .args(["--config", &config, "run"])
        .arg(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No model directories found"));
}
