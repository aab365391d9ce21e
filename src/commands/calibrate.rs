use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifact::{op_names, save_artifact};
use crate::capture::CaptureManager;
use crate::db::KeyValueStore;
use crate::error::{AmpooseError, Result};
use crate::har::parse_har_file;

use super::util::open_store;

pub struct CalibrateOptions {
    pub store_path: PathBuf,
    pub har_files: Vec<PathBuf>,
}

/// What a calibration pass captured and whether it was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationReport {
    pub observed_calls: usize,
    pub captured: Vec<(String, String)>,
    pub unmatched: Vec<String>,
    pub missing: Vec<String>,
    pub saved: bool,
}

/// Calibrate from recorded HAR traffic.
pub fn run_calibrate(options: &CalibrateOptions) -> Result<()> {
    if options.har_files.is_empty() {
        return Err(AmpooseError::InvalidArgs(
            "calibrate needs HAR file(s) or --cdp".to_string(),
        ));
    }

    let manager = CaptureManager::new();
    manager.start();
    for path in &options.har_files {
        let entries = feed_har(&manager, path)?;
        println!("Read {} entries from {}", entries, path.display());
    }

    let store = open_store(&options.store_path)?;
    let report = persist_capture(&manager, store.as_ref())?;
    print_report(&report, &options.store_path);
    Ok(())
}

/// Feed every request in a HAR file to the capture manager.
pub fn feed_har(manager: &CaptureManager, path: &Path) -> Result<usize> {
    let har = parse_har_file(path)?;
    for entry in &har.log.entries {
        manager.observe(&entry.request.to_observed());
    }
    Ok(har.log.entries.len())
}

/// Save the captured artifact when at least one operation was captured.
pub fn persist_capture(
    manager: &CaptureManager,
    store: &dyn KeyValueStore,
) -> Result<CalibrationReport> {
    let artifact = manager.build_artifact();
    let saved = !artifact.entries.is_empty();
    if saved {
        save_artifact(store, &artifact)?;
    }
    let missing = manager.get_missing();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "calibration incomplete");
    }

    Ok(CalibrationReport {
        observed_calls: manager.observed_calls(),
        captured: artifact
            .entries
            .values()
            .map(|entry| (entry.query_name.to_string(), entry.doc_id.clone()))
            .collect(),
        unmatched: manager.unmatched(),
        missing: op_names(&missing),
        saved,
    })
}

pub fn print_report(report: &CalibrationReport, store_path: &Path) {
    println!("Observed {} GraphQL calls", report.observed_calls);
    for (name, doc_id) in &report.captured {
        println!("  captured {name} (doc_id {doc_id})");
    }
    if !report.unmatched.is_empty() {
        println!("Unmatched operations: {}", report.unmatched.join(", "));
    }
    if report.saved {
        println!("Saved calibration to {}", store_path.display());
    } else {
        println!("No operations captured; nothing saved");
    }
    if report.missing.is_empty() {
        println!("Calibration ready");
    } else {
        println!(
            "Warning: missing required operations: {}",
            report.missing.join(", ")
        );
    }
}
