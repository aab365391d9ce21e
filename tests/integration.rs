use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Runs the binary inside `tmp` with config discovery confined to it.
fn ampoose(tmp: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!();
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path().join(".config"))
        .env_remove("APPDATA")
        .env_remove("RUST_LOG");
    cmd
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn calibrate(tmp: &TempDir) {
    ampoose(tmp)
        .arg("calibrate")
        .arg(fixture("calibration.har"))
        .assert()
        .success();
}

#[test]
fn test_help() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("post history"));
}

#[test]
fn test_version() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ampoose"));
}

#[test]
fn test_config_defaults() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[export]"))
        .stdout(predicate::str::contains("chunk_size = 500"))
        .stdout(predicate::str::contains("cdp_port = 9222"));
}

#[test]
fn test_config_file_in_working_directory() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("ampoose.toml"),
        "[export]\nchunk_size = 42\nmode = \"count\"\n",
    )
    .unwrap();

    ampoose(&tmp)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("chunk_size = 42"))
        .stdout(predicate::str::contains("mode = \"count\""));
}

#[test]
fn test_invalid_config_file() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join(".ampooserc"), "[export]\nmode = \"forever\"\n").unwrap();

    ampoose(&tmp)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn test_status_without_calibration() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("calibration=missing"))
        .stdout(predicate::str::contains(
            "missing=ProfileCometTimelineFeedRefetchQuery",
        ));
}

#[test]
fn test_calibrate_from_har() {
    let tmp = TempDir::new().unwrap();

    ampoose(&tmp)
        .arg("calibrate")
        .arg(fixture("calibration.har"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Read 4 entries"))
        .stdout(predicate::str::contains(
            "captured ProfileCometTimelineFeedRefetchQuery (doc_id 7777)",
        ))
        .stdout(predicate::str::contains(
            "captured CometSinglePostContentQuery (doc_id 8888)",
        ))
        .stdout(predicate::str::contains("CometNotificationsDropdownQuery"))
        .stdout(predicate::str::contains("Calibration ready"));

    assert!(tmp.path().join("ampoose.db").exists());

    ampoose(&tmp)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"calibration\":\"ready\""))
        .stdout(predicate::str::contains("\"collection_id\":\"100042\""));
}

#[test]
fn test_calibrate_with_custom_db() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("state").join("custom.db");

    ampoose(&tmp)
        .arg("--db")
        .arg(&db_path)
        .arg("calibrate")
        .arg(fixture("calibration.har"))
        .assert()
        .success();
    assert!(db_path.exists());

    ampoose(&tmp)
        .arg("status")
        .arg("--db")
        .arg(&db_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("calibration=ready"));
}

#[test]
fn test_calibrate_requires_input() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .arg("calibrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("calibrate needs HAR file(s)"));
}

#[test]
fn test_calibrate_missing_file() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .args(["calibrate", "nonexistent.har"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_export_requires_calibration() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .args(["export", "--delay-ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Calibration required"))
        .stderr(predicate::str::contains("ProfileCometTimelineFeedRefetchQuery"));
}

#[test]
fn test_export_reports_unreachable_endpoint() {
    let tmp = TempDir::new().unwrap();
    calibrate(&tmp);

    ampoose(&tmp)
        .args([
            "export",
            "--delay-ms",
            "0",
            "--endpoint",
            "http://127.0.0.1:9/api/graphql/",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GraphQL request failed"));
}

#[test]
fn test_cursors_round_trip() {
    let tmp = TempDir::new().unwrap();
    calibrate(&tmp);

    let transfer = tmp.path().join("cursors.json");
    std::fs::write(
        &transfer,
        r#"{
          "format": "ampoose-resume-cursors-v1",
          "version": 1,
          "collectionId": "100042",
          "exportedAt": "2024-03-02T10:00:00Z",
          "resumeCursors": [
            {
              "runId": 3,
              "cursor": "AQHRx9",
              "pagesFetched": 4,
              "totalPosts": 12,
              "savedAt": "2024-03-02T09:59:00Z"
            }
          ]
        }"#,
    )
    .unwrap();

    ampoose(&tmp)
        .args(["cursors", "import"])
        .arg(&transfer)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported resume cursors for 100042; 1 stored"));

    ampoose(&tmp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("resume_cursors=1"));

    let exported = tmp.path().join("out.json");
    ampoose(&tmp)
        .args(["cursors", "export", "-o"])
        .arg(&exported)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 resume cursors"));

    let payload: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&exported).unwrap()).unwrap();
    assert_eq!(payload["format"], "ampoose-resume-cursors-v1");
    assert_eq!(payload["collectionId"], "100042");
    assert_eq!(payload["resumeCursors"][0]["cursor"], "AQHRx9");
}

#[test]
fn test_cursors_import_rejects_foreign_file() {
    let tmp = TempDir::new().unwrap();
    let transfer = tmp.path().join("other.json");
    std::fs::write(
        &transfer,
        r#"{"format": "something-else", "version": 1, "collectionId": "1",
            "exportedAt": "", "resumeCursors": []}"#,
    )
    .unwrap();

    ampoose(&tmp)
        .args(["cursors", "import"])
        .arg(&transfer)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a resume cursor export"));
}

#[test]
fn test_cursors_export_requires_calibration() {
    let tmp = TempDir::new().unwrap();
    ampoose(&tmp)
        .args(["cursors", "export"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no calibrated profile"));
}
