use std::path::PathBuf;

use serde::Serialize;

use crate::artifact::{calibration_status, load_artifact, op_names, CalibrationStatus, REQUIRED_OPS};
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::export::{load_checkpoint, load_resume_cursors};

use super::util::open_store;

#[derive(Clone, Debug, Default)]
pub struct StatusOptions {
    pub store_path: PathBuf,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct OperationStatus {
    name: String,
    doc_id: String,
}

#[derive(Debug, Serialize)]
struct CheckpointSummary {
    run_id: u64,
    pages_fetched: u32,
    total_posts: usize,
    next_cursor: Option<String>,
    saved_at: String,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    calibration: &'static str,
    updated_at: Option<i64>,
    collection_id: Option<String>,
    operations: Vec<OperationStatus>,
    missing: Vec<String>,
    checkpoint: Option<CheckpointSummary>,
    resume_cursors: usize,
}

fn collect_status(store: &dyn KeyValueStore) -> Result<StatusOutput> {
    let artifact = load_artifact(store)?;
    let status = calibration_status(artifact.as_ref());
    let missing = match &status {
        CalibrationStatus::Ready => Vec::new(),
        CalibrationStatus::Incomplete(missing) => op_names(missing),
        CalibrationStatus::Missing => op_names(REQUIRED_OPS),
    };
    let collection_id = artifact.as_ref().and_then(|a| a.collection_id());

    let (checkpoint, resume_cursors) = match &collection_id {
        Some(id) => (
            load_checkpoint(store, id)?.map(|c| CheckpointSummary {
                run_id: c.run_id,
                pages_fetched: c.pages_fetched,
                total_posts: c.total_posts,
                next_cursor: c.next_cursor,
                saved_at: c.saved_at,
            }),
            load_resume_cursors(store, id)?.len(),
        ),
        None => (None, 0),
    };

    Ok(StatusOutput {
        calibration: status.label(),
        updated_at: artifact.as_ref().map(|a| a.updated_at),
        collection_id,
        operations: artifact
            .iter()
            .flat_map(|a| a.entries.values())
            .map(|entry| OperationStatus {
                name: entry.query_name.to_string(),
                doc_id: entry.doc_id.clone(),
            })
            .collect(),
        missing,
        checkpoint,
        resume_cursors,
    })
}

/// Show calibration readiness and the latest run checkpoint.
pub fn run_status(options: &StatusOptions) -> Result<()> {
    let store = open_store(&options.store_path)?;
    let out = collect_status(store.as_ref())?;

    if options.json {
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    }

    println!("calibration={}", out.calibration);
    if let Some(updated_at) = out.updated_at {
        let when = chrono::DateTime::from_timestamp_millis(updated_at)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| updated_at.to_string());
        println!("updated_at={when}");
    }
    println!("collection_id={}", out.collection_id.as_deref().unwrap_or(""));
    for op in &out.operations {
        println!("operation={} doc_id={}", op.name, op.doc_id);
    }
    if !out.missing.is_empty() {
        println!("missing={}", out.missing.join(","));
    }
    if let Some(checkpoint) = &out.checkpoint {
        println!(
            "checkpoint=run {} pages={} posts={} saved_at={}",
            checkpoint.run_id, checkpoint.pages_fetched, checkpoint.total_posts, checkpoint.saved_at
        );
    }
    println!("resume_cursors={}", out.resume_cursors);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{build_graphql_artifact, save_artifact, CalibrationEntry};
    use crate::capture::CanonicalOp;
    use crate::db::MemoryStore;
    use serde_json::{json, Map};

    #[test]
    fn empty_store_reports_missing() {
        let out = collect_status(&MemoryStore::new()).unwrap();
        assert_eq!(out.calibration, "missing");
        assert_eq!(out.missing, vec!["ProfileCometTimelineFeedRefetchQuery"]);
        assert!(out.checkpoint.is_none());
    }

    #[test]
    fn invalid_timeline_entry_is_incomplete() {
        let store = MemoryStore::new();
        let timeline = CalibrationEntry {
            query_name: CanonicalOp::ProfileTimeline,
            doc_id: "777".to_string(),
            variables: Map::new(),
            request_params: None,
            preload: Vec::new(),
        };
        let single = CalibrationEntry {
            query_name: CanonicalOp::SinglePost,
            doc_id: "888".to_string(),
            ..timeline.clone()
        };
        save_artifact(&store, &build_graphql_artifact([timeline, single])).unwrap();

        let out = collect_status(&store).unwrap();
        assert_eq!(out.calibration, "incomplete");
        assert_eq!(out.operations.len(), 1);
        assert_eq!(out.operations[0].doc_id, "888");
        assert_eq!(out.missing, vec!["ProfileCometTimelineFeedRefetchQuery"]);
    }

    #[test]
    fn ready_store_names_its_collection() {
        let store = MemoryStore::new();
        let mut variables = Map::new();
        variables.insert("id".to_string(), json!("1000"));
        let entry = CalibrationEntry {
            query_name: CanonicalOp::ProfileTimeline,
            doc_id: "777".to_string(),
            variables,
            request_params: None,
            preload: Vec::new(),
        };
        save_artifact(&store, &build_graphql_artifact([entry])).unwrap();

        let out = collect_status(&store).unwrap();
        assert_eq!(out.calibration, "ready");
        assert_eq!(out.collection_id.as_deref(), Some("1000"));
        assert!(out.missing.is_empty());
    }
}
