use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvester_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvester");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let images_dir = root.join("images");
    fs::create_dir_all(images_dir.join("2025-03")).unwrap();
    fs::write(images_dir.join("2025-03/monday.jpg"), b"monday schedule").unwrap();
    fs::write(images_dir.join("2025-03/tuesday.png"), b"tuesday schedule").unwrap();
    fs::write(images_dir.join("readme.txt"), b"not an image").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/harvester.sqlite"

[pipeline]
max_retries = 2

[collector]
root = "{root}/images"

[extraction]
provider = "disabled"

[logging]
filter = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("harvester.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvester(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvester_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvester binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvester(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/harvester.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_harvester(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_harvester(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_collect_registers_images_once() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);

    let (stdout, stderr, success) = run_harvester(&config_path, &["collect"]);
    assert!(success, "collect failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("artifacts found: 2"));
    assert!(stdout.contains("new imports: 2"));

    let (stdout, _, _) = run_harvester(&config_path, &["collect"]);
    assert!(stdout.contains("new imports: 0"));
    assert!(stdout.contains("duplicates skipped: 2"));
}

#[test]
fn test_process_with_disabled_extractor_exhausts_retries() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);
    run_harvester(&config_path, &["collect"]);

    let (stdout, stderr, success) = run_harvester(&config_path, &["process"]);
    assert!(success, "process failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("imports attempted: 2"));
    assert!(stdout.contains("will retry: 2"));

    let (stdout, _, _) = run_harvester(&config_path, &["process"]);
    assert!(stdout.contains("failed permanently: 2"));

    let (stdout, _, _) = run_harvester(&config_path, &["process"]);
    assert!(stdout.contains("imports attempted: 0"));

    let (stdout, _, success) = run_harvester(&config_path, &["imports", "--state", "failed"]);
    assert!(success);
    assert!(stdout.contains("monday.jpg"));
    assert!(stdout.contains("tuesday.png"));
}

#[test]
fn test_cycle_runs_without_prior_completion() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);

    let (stdout, stderr, success) = run_harvester(&config_path, &["cycle"]);
    assert!(success, "cycle failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("new imports: 2"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_cycle_force() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);

    let (stdout, _, success) = run_harvester(&config_path, &["cycle", "--force"]);
    assert!(success);
    assert!(stdout.contains("artifacts found: 2"));
}

#[test]
fn test_deliveries_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);

    let (stdout, _, success) = run_harvester(&config_path, &["deliveries"]);
    assert!(success);
    assert!(stdout.contains("No deliveries."));

    let (stdout, _, success) = run_harvester(&config_path, &["deliveries", "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn test_deliveries_rejects_bad_date() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);

    let (_, stderr, success) = run_harvester(&config_path, &["deliveries", "--since", "March"]);
    assert!(!success);
    assert!(stderr.contains("YYYY-MM-DD"));
}

#[test]
fn test_imports_rejects_unknown_state() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);

    let (_, stderr, success) = run_harvester(&config_path, &["imports", "--state", "archived"]);
    assert!(!success);
    assert!(stderr.contains("invalid import state"));
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_harvester(&config_path, &["init"]);
    run_harvester(&config_path, &["collect"]);

    let (stdout, stderr, success) = run_harvester(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Imports:     2"));
    assert!(stdout.contains("pending:   2"));
    assert!(stdout.contains("Last import: never"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("max_retries = 2", "max_retries = 0"),
    )
    .unwrap();

    let (_, stderr, success) = run_harvester(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("max_retries"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_harvester(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
