//! End-to-end tests of the `mapsync` binary that need no network.

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PROJECT: &str = r#"{
  "name": "Parcels",
  "tree": [
    {"group": {"id": "g1", "name": "Base", "children": [
      {"layer": {"id": "roads", "name": "Roads", "provider": "ogr",
                 "source": "/data/roads.shp", "geometry": "line", "crs": "EPSG:4326"}}
    ]}},
    {"layer": {"id": "sat", "name": "Satellite", "provider": "wms",
               "source": "url=https://tiles.example.com/wms&layers=sat", "geometry": "wms"}}
  ]
}"#;

/// Isolated home directory and database.
struct Env {
    home: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
        }
    }

    fn db(&self) -> PathBuf {
        self.home.path().join("test.db")
    }

    fn project(&self) -> PathBuf {
        let path = self.home.path().join("parcels.json");
        std::fs::write(&path, PROJECT).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("mapsync").unwrap();
        cmd.env("HOME", self.home.path())
            .env("MAPSYNC_DB", self.db())
            .env_remove("MAPSYNC_API_KEY")
            .env_remove("MAPSYNC_HOST")
            .env_remove("RUST_LOG");
        cmd
    }
}

fn stderr_json(output: &std::process::Output) -> serde_json::Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .find(|l| l.starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON error in stderr: {text}"));
    serde_json::from_str(line).unwrap()
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_version_json() {
    let env = Env::new();
    let output = env.cmd().args(["version", "--json"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_completions_name_binary() {
    let env = Env::new();
    let output = env.cmd().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("mapsync"));
}

#[test]
fn test_missing_project_is_not_found() {
    let env = Env::new();
    let missing = env.home.path().join("nope.json");
    let output = env
        .cmd()
        .args(["analyze", missing.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stderr_json(&output)["error"]["code"], "PROJECT_NOT_FOUND");
}

#[test]
fn test_analyze_requires_login() {
    let env = Env::new();
    let project = env.project();
    let output = env
        .cmd()
        .args(["analyze", project.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(5));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["code"], "NOT_LOGGED_IN");
    assert!(err["error"]["hint"].as_str().unwrap().contains("login"));
}

#[test]
fn test_touch_then_status() {
    let env = Env::new();
    let project = env.project();
    let path = project.to_str().unwrap();

    let output = env.cmd().args(["touch", path, "roads"]).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let touched = stdout_json(&output);
    assert_eq!(touched[0]["layer_id"], "roads");
    assert!(touched[0]["timestamp"].as_i64().unwrap() > 0);

    let output = env.cmd().args(["status", path]).output().unwrap();
    assert!(output.status.success());
    let status = stdout_json(&output);
    assert_eq!(status["name"], "Parcels");
    assert_eq!(status["layers_with_data_changes"], 1);
    assert!(status["map_id"].is_null());
    assert_eq!(status["runs"].as_array().unwrap().len(), 0);
}

#[test]
fn test_touch_unknown_layer() {
    let env = Env::new();
    let project = env.project();
    let output = env
        .cmd()
        .args(["touch", project.to_str().unwrap(), "rivers"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(stderr_json(&output)["error"]["code"], "INVALID_ARGUMENT");
}

#[test]
fn test_login_without_verify_then_logout() {
    let env = Env::new();
    let key_file = |home: &Path| home.join(".mapsync").join("api_key");

    let output = env
        .cmd()
        .args(["login", "secret-key", "--no-verify"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        std::fs::read_to_string(key_file(env.home.path())).unwrap(),
        "secret-key"
    );

    let output = env.cmd().arg("logout").output().unwrap();
    assert_eq!(stdout_json(&output)["logged_out"], true);
    assert!(!key_file(env.home.path()).exists());

    let output = env.cmd().arg("logout").output().unwrap();
    assert_eq!(stdout_json(&output)["logged_out"], false);
}

#[test]
fn test_invalid_host_is_config_error() {
    let env = Env::new();
    let project = env.project();
    let output = env
        .cmd()
        .args(["analyze", project.to_str().unwrap()])
        .args(["--api-key", "k", "--host", "not a url"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stderr_json(&output)["error"]["code"], "CONFIG_ERROR");
}
