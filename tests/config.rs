use std::fs;
use std::path::PathBuf;

use pis::config::{Cli, ConfigFile, LogLevel, Settings};
use tempfile::tempdir;

const RECIPE: &str = r#"
steps:
  demo:
    - name: hello_world
      destination: out.txt
      who: world
  other:
    - name: download daily
      destination: daily.csv
      url: https://example.com/daily.csv
scratchpad:
  target: world
  hosts: [a, b]
pool: 3
log_level: WARNING
remote_uri: gs://bucket/prefix
"#;

fn cli(step: &str) -> Cli {
    Cli {
        step: step.to_string(),
        config_file: None,
        work_dir: None,
        remote_uri: None,
        pool: None,
        log_level: None,
    }
}

fn load_recipe() -> (tempfile::TempDir, PathBuf, ConfigFile) {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.yaml");
    fs::write(&path, RECIPE).unwrap();
    let file = ConfigFile::load(&path).unwrap();
    (temp, path, file)
}

#[test]
fn yaml_overrides_defaults() {
    let (_temp, path, file) = load_recipe();
    let settings = Settings::resolve(&cli("demo"), path, &file).unwrap();
    assert_eq!(settings.step, "demo");
    assert_eq!(settings.pool, 3);
    assert_eq!(settings.log_level, LogLevel::Warning);
    assert_eq!(settings.remote_uri.as_deref(), Some("gs://bucket/prefix"));
    assert_eq!(settings.work_dir, PathBuf::from("./output"));
}

#[test]
fn cli_overrides_yaml() {
    let (_temp, path, file) = load_recipe();
    let mut args = cli("demo");
    args.pool = Some(10);
    args.log_level = Some(LogLevel::Debug);
    args.remote_uri = Some("gs://elsewhere/p".to_string());
    args.work_dir = Some(PathBuf::from("/tmp/pis"));
    let settings = Settings::resolve(&args, path, &file).unwrap();
    assert_eq!(settings.pool, 10);
    assert_eq!(settings.log_level, LogLevel::Debug);
    assert_eq!(settings.remote_uri.as_deref(), Some("gs://elsewhere/p"));
    assert_eq!(settings.work_dir, PathBuf::from("/tmp/pis"));
}

#[test]
fn empty_step_is_rejected() {
    let (_temp, path, file) = load_recipe();
    assert!(Settings::resolve(&cli(""), path, &file).is_err());
}

#[test]
fn unknown_step_is_rejected() {
    let (_temp, path, file) = load_recipe();
    let err = Settings::resolve(&cli("nope"), path, &file).unwrap_err();
    assert!(err.to_string().contains("nope"));
    assert!(err.to_string().contains("demo"));
}

#[test]
fn unsupported_remote_scheme_is_rejected() {
    let (_temp, path, file) = load_recipe();
    let mut args = cli("demo");
    args.remote_uri = Some("s3://bucket/prefix".to_string());
    let err = Settings::resolve(&args, path, &file).unwrap_err();
    assert!(err.to_string().contains("s3://bucket/prefix"));
}

#[test]
fn zero_pool_is_rejected() {
    let (_temp, path, file) = load_recipe();
    let mut args = cli("demo");
    args.pool = Some(0);
    assert!(Settings::resolve(&args, path, &file).is_err());
}

#[test]
fn task_definitions_keep_open_fields() {
    let (_temp, _, file) = load_recipe();
    let defs = &file.steps["other"];
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].name, "download daily");
    assert_eq!(defs[0].real_name(), "download");
    assert_eq!(defs[0].destination.as_deref(), Some(std::path::Path::new("daily.csv")));
    assert_eq!(
        defs[0].params["url"].as_str(),
        Some("https://example.com/daily.csv")
    );
}

#[test]
fn scratchpad_section_parses_strings_and_lists() {
    let (_temp, _, file) = load_recipe();
    assert_eq!(file.scratchpad["target"].as_str(), Some("world"));
    assert!(file.scratchpad["hosts"].is_array());
}

#[test]
fn missing_config_file_is_an_error() {
    let err = ConfigFile::load(std::path::Path::new("does-not-exist.yaml")).unwrap_err();
    assert!(err.to_string().contains("does-not-exist.yaml"));
}

#[test]
fn settings_round_trip_preserves_fields() {
    let (_temp, path, file) = load_recipe();
    let settings = Settings::resolve(&cli("demo"), path, &file).unwrap();
    let serialized = serde_json::to_value(&settings).unwrap();
    assert_eq!(serialized["step"], "demo");
    assert_eq!(serialized["pool"], 3);
    assert_eq!(serialized["log_level"], "warning");
    assert_eq!(serialized["remote_uri"], "gs://bucket/prefix");
}
