use std::process::Command;

fn demo_config() -> String {
    format!("{}/demos/taskwatch.yaml", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn cli_mode_with_config_and_dry_run_works() {
    let binary_path = env!("CARGO_BIN_EXE_taskwatch");

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(demo_config())
        .arg("--dry-run")
        .arg("--log-level")
        .arg("error")
        .output()
        .expect("Failed to start taskwatch binary");

    assert!(
        output.status.success(),
        "Process exited with non-zero status: {}\nStdout: {}\nStderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_mode_without_study_fails() {
    let binary_path = env!("CARGO_BIN_EXE_taskwatch");

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(demo_config())
        .arg("--log-level")
        .arg("error")
        .output()
        .expect("Failed to start taskwatch binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--study"), "unexpected stderr: {stderr}");
}

#[test]
fn cli_mode_rejects_invalid_config() {
    let binary_path = env!("CARGO_BIN_EXE_taskwatch");
    let dir = std::env::temp_dir().join(format!("taskwatch-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let config_path = dir.join("invalid.yaml");
    std::fs::write(&config_path, "reconcile:\n  interval_secs: 0\n").unwrap();

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(&config_path)
        .arg("--dry-run")
        .output()
        .expect("Failed to start taskwatch binary");

    assert!(!output.status.success());
    let _ = std::fs::remove_dir_all(&dir);
}
