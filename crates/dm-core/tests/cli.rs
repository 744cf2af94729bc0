//! CLI tests for the dm-core binary: exit codes and command output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn dm_core() -> Command {
    let mut cmd = Command::cargo_bin("dm-core").expect("dm-core binary should exist");
    cmd.env_remove("DRIFT_MONITOR_CONFIG")
        .env_remove("DRIFT_MONITOR_CONFIG_DIR")
        .env("DM_LOG", "error");
    cmd
}

/// Write a config plus a reference CSV of `rows` numeric rows.
fn fixture(dir: &Path, rows: usize, window_size: usize, min_reference_size: usize) -> PathBuf {
    fixture_with(dir, rows, window_size, min_reference_size, "")
}

/// Same as [`fixture`], with extra YAML appended after the service section.
fn fixture_with(
    dir: &Path,
    rows: usize,
    window_size: usize,
    min_reference_size: usize,
    extra: &str,
) -> PathBuf {
    let mut csv = String::from("x,y\n");
    for i in 0..rows {
        csv.push_str(&format!("{},{}\n", i, i * 2));
    }
    fs::write(dir.join("reference.csv"), csv).expect("write csv");

    let config = dir.join("config.yaml");
    fs::write(
        &config,
        format!(
            "service:\n  reference_path: reference.csv\n  window_size: {}\n  min_reference_size: {}\n  monitors: [data_drift]\n{}",
            window_size, min_reference_size, extra
        ),
    )
    .expect("write config");
    config
}

mod arguments {
    use super::*;

    #[test]
    fn version_prints_package_version() {
        dm_core()
            .arg("version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn unknown_command_is_args_error() {
        dm_core()
            .arg("nonexistent-command")
            .assert()
            .code(10)
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn replay_requires_csv() {
        dm_core().arg("replay").assert().code(10);
    }

    #[test]
    fn zero_batch_size_rejected() {
        dm_core()
            .args(["replay", "x.csv", "--batch-size", "0"])
            .assert()
            .code(10);
    }
}

mod check {
    use super::*;

    #[test]
    fn reports_reference_and_window() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path(), 100, 30, 0);

        let output = dm_core()
            .arg("--config")
            .arg(&config)
            .arg("check")
            .output()
            .unwrap();
        assert!(output.status.success(), "{:?}", output);

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["reference"]["rows"], 70);
        assert_eq!(report["window"]["seeded_rows"], 30);
        assert_eq!(report["config"]["config_source"], "CLI argument");
        assert_eq!(
            report["reference"]["fingerprint"].as_str().map(str::len),
            Some(64)
        );
    }

    #[test]
    fn missing_config_is_config_error() {
        dm_core()
            .args(["--config", "/nonexistent/dm/config.yaml", "check"])
            .assert()
            .code(11);
    }

    #[test]
    fn small_reference_is_config_error() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path(), 40, 30, 20);
        dm_core()
            .arg("--config")
            .arg(&config)
            .arg("check")
            .assert()
            .code(11)
            .stderr(predicate::str::contains("Fix:"));
    }
}

mod replay {
    use super::*;

    #[test]
    fn prints_metrics_after_replay() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path(), 20, 5, 0);
        let production = dir.path().join("prod.csv");
        fs::write(&production, "x,y\n100,1\n101,2\n102,3\n").unwrap();

        dm_core()
            .arg("--config")
            .arg(&config)
            .args(["replay", production.to_str().unwrap(), "--batch-size", "2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("drift_monitor_rows_ingested_total 3"))
            .stdout(predicate::str::contains("drift_monitor_column_mean{"));
    }

    fn replay_with_period(interval: Option<&str>) -> String {
        let dir = TempDir::new().unwrap();
        let config = fixture_with(dir.path(), 20, 5, 0, "  calculation_period_sec: 3600\n");
        let production = dir.path().join("prod.csv");
        fs::write(&production, "x,y\n100,1\n101,2\n102,3\n").unwrap();

        let mut cmd = dm_core();
        cmd.arg("--config")
            .arg(&config)
            .args(["replay", production.to_str().unwrap()]);
        if let Some(interval) = interval {
            cmd.args(["--batch-interval-sec", interval]);
        }
        let output = cmd.output().unwrap();
        assert!(output.status.success(), "{:?}", output);
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn replay_clock_advances_one_period_per_batch() {
        let stdout = replay_with_period(None);
        assert!(
            stdout.contains(r#"drift_monitor_evaluations_total{outcome="evaluated"} 3"#),
            "{stdout}"
        );
        assert!(!stdout.contains(r#"outcome="throttled""#), "{stdout}");
    }

    #[test]
    fn replay_interval_below_period_is_throttled() {
        let stdout = replay_with_period(Some("0"));
        assert!(
            stdout.contains(r#"drift_monitor_evaluations_total{outcome="evaluated"} 1"#),
            "{stdout}"
        );
        assert!(
            stdout.contains(r#"drift_monitor_evaluations_total{outcome="throttled"} 2"#),
            "{stdout}"
        );
    }

    #[test]
    fn unlisted_monitor_groups_publish_nothing() {
        let dir = TempDir::new().unwrap();
        let config = fixture_with(dir.path(), 20, 5, 0, "column_mapping:\n  target: y\n");
        let production = dir.path().join("prod.csv");
        fs::write(&production, "x,y\n100,1\n").unwrap();

        dm_core()
            .arg("--config")
            .arg(&config)
            .args(["replay", production.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"drift_monitor_column_mean{column="x""#))
            .stdout(predicate::str::contains("drift_monitor_target_mean").not())
            .stdout(predicate::str::contains("drift_monitor_mean_error").not());
    }

    #[test]
    fn mismatched_columns_are_data_error() {
        let dir = TempDir::new().unwrap();
        let config = fixture(dir.path(), 20, 5, 0);
        let production = dir.path().join("prod.csv");
        fs::write(&production, "x,z\n1,2\n").unwrap();

        dm_core()
            .arg("--config")
            .arg(&config)
            .args(["replay", production.to_str().unwrap()])
            .assert()
            .code(12);
    }
}
