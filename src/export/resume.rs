//! Run checkpoints and resume cursors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chunks::ChunkState;
use super::post::ExportPost;
use crate::db::KeyValueStore;
use crate::error::{AmpooseError, Result};
use crate::timeline::Actor;

pub const RESUME_FORMAT: &str = "ampoose-resume-cursors-v1";
pub const RESUME_VERSION: u32 = 1;
pub const MAX_RESUME_CURSORS: usize = 20;

pub fn checkpoint_key(collection_id: &str) -> String {
    format!("checkpoint:{collection_id}")
}

pub fn resume_cursors_key(collection_id: &str) -> String {
    format!("resume_cursors:{collection_id}")
}

/// Everything needed to pick a run up where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCheckpoint {
    pub run_id: u64,
    pub cursor: Option<String>,
    pub next_cursor: Option<String>,
    pub pages_fetched: u32,
    pub total_posts: usize,
    pub chunk: ChunkState,
    /// Posts not yet flushed to a part file.
    pub posts: Vec<ExportPost>,
    /// Posts past the count limit, restored when the run continues.
    #[serde(default)]
    pub held_back: Vec<ExportPost>,
    pub seen_ids: Vec<String>,
    pub profile: Option<Actor>,
    pub author: Option<Actor>,
    pub saved_at: String,
}

pub fn save_checkpoint(
    store: &dyn KeyValueStore,
    collection_id: &str,
    checkpoint: &RunCheckpoint,
) -> Result<()> {
    store.set(&checkpoint_key(collection_id), &serde_json::to_value(checkpoint)?)
}

/// Load the checkpoint for a collection. An unreadable checkpoint is treated as absent.
pub fn load_checkpoint(
    store: &dyn KeyValueStore,
    collection_id: &str,
) -> Result<Option<RunCheckpoint>> {
    let Some(raw) = store.get(&checkpoint_key(collection_id))? else {
        return Ok(None);
    };
    match serde_json::from_value(raw) {
        Ok(checkpoint) => Ok(Some(checkpoint)),
        Err(err) => {
            tracing::warn!(collection_id, %err, "ignoring unreadable checkpoint");
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeCursor {
    pub run_id: u64,
    pub cursor: String,
    #[serde(default)]
    pub pages_fetched: u32,
    #[serde(default)]
    pub total_posts: usize,
    pub saved_at: String,
}

/// Transfer payload for moving resume cursors between machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeCursorPayload {
    pub format: String,
    pub version: u32,
    pub collection_id: String,
    pub exported_at: String,
    pub resume_cursors: Vec<ResumeCursor>,
}

pub fn load_resume_cursors(
    store: &dyn KeyValueStore,
    collection_id: &str,
) -> Result<Vec<ResumeCursor>> {
    let raw = store.get(&resume_cursors_key(collection_id))?;
    Ok(raw
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default())
}

fn merge_cursors(existing: Vec<ResumeCursor>, incoming: Vec<ResumeCursor>) -> Vec<ResumeCursor> {
    let mut merged: Vec<ResumeCursor> = Vec::new();
    for record in incoming.into_iter().chain(existing) {
        if record.cursor.trim().is_empty() {
            continue;
        }
        let duplicate = merged
            .iter()
            .any(|r| r.run_id == record.run_id && r.cursor == record.cursor);
        if !duplicate {
            merged.push(record);
        }
    }
    // RFC 3339 timestamps in UTC sort lexically.
    merged.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    merged.truncate(MAX_RESUME_CURSORS);
    merged
}

/// Record a cursor, newest first. Returns the stored list.
pub fn push_resume_cursor(
    store: &dyn KeyValueStore,
    collection_id: &str,
    record: ResumeCursor,
) -> Result<Vec<ResumeCursor>> {
    let merged = merge_cursors(load_resume_cursors(store, collection_id)?, vec![record]);
    store.set(&resume_cursors_key(collection_id), &serde_json::to_value(&merged)?)?;
    Ok(merged)
}

pub fn export_resume_cursors(
    store: &dyn KeyValueStore,
    collection_id: &str,
) -> Result<ResumeCursorPayload> {
    Ok(ResumeCursorPayload {
        format: RESUME_FORMAT.to_string(),
        version: RESUME_VERSION,
        collection_id: collection_id.to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        resume_cursors: load_resume_cursors(store, collection_id)?,
    })
}

/// Validate a transfer payload and merge it into the store. Returns the
/// collection id it was filed under and how many cursors are now stored.
pub fn import_resume_cursors(store: &dyn KeyValueStore, raw: &Value) -> Result<(String, usize)> {
    let format = raw.get("format").and_then(Value::as_str);
    if format != Some(RESUME_FORMAT) {
        return Err(AmpooseError::InvalidArgs(format!(
            "not a resume cursor export (format {:?}, expected {RESUME_FORMAT})",
            format.unwrap_or("missing")
        )));
    }
    let version = raw.get("version").and_then(Value::as_u64);
    if version != Some(u64::from(RESUME_VERSION)) {
        return Err(AmpooseError::InvalidArgs(format!(
            "unsupported resume cursor version {version:?}"
        )));
    }
    let payload: ResumeCursorPayload = serde_json::from_value(raw.clone())?;
    if payload.collection_id.trim().is_empty() {
        return Err(AmpooseError::InvalidArgs(
            "resume cursor export has no collectionId".to_string(),
        ));
    }

    let existing = load_resume_cursors(store, &payload.collection_id)?;
    let merged = merge_cursors(existing, payload.resume_cursors);
    store.set(&resume_cursors_key(&payload.collection_id), &serde_json::to_value(&merged)?)?;
    Ok((payload.collection_id, merged.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    fn cursor(run_id: u64, cursor: &str, saved_at: &str) -> ResumeCursor {
        ResumeCursor {
            run_id,
            cursor: cursor.to_string(),
            pages_fetched: 1,
            total_posts: 3,
            saved_at: saved_at.to_string(),
        }
    }

    #[test]
    fn cursors_are_newest_first_deduplicated_and_capped() {
        let store = MemoryStore::new();
        for i in 0..25 {
            let saved_at = format!("2024-01-01T00:00:{i:02}Z");
            push_resume_cursor(&store, "1000", cursor(1, &format!("C{i:02}"), &saved_at)).unwrap();
        }
        push_resume_cursor(&store, "1000", cursor(1, "C24", "2024-01-01T00:00:24Z")).unwrap();

        let stored = load_resume_cursors(&store, "1000").unwrap();
        assert_eq!(stored.len(), MAX_RESUME_CURSORS);
        assert_eq!(stored[0].cursor, "C24");
        assert_eq!(stored.last().unwrap().cursor, "C05");
    }

    #[test]
    fn export_then_import_into_another_store() {
        let source = MemoryStore::new();
        push_resume_cursor(&source, "1000", cursor(3, "ABC", "2024-02-01T00:00:00Z")).unwrap();
        let payload =
            serde_json::to_value(export_resume_cursors(&source, "1000").unwrap()).unwrap();
        assert_eq!(payload["format"], RESUME_FORMAT);
        assert_eq!(payload["resumeCursors"][0]["runId"], 3);

        let target = MemoryStore::new();
        push_resume_cursor(&target, "1000", cursor(2, "OLD", "2024-01-01T00:00:00Z")).unwrap();
        let (collection, count) = import_resume_cursors(&target, &payload).unwrap();
        assert_eq!((collection.as_str(), count), ("1000", 2));
        assert_eq!(load_resume_cursors(&target, "1000").unwrap()[0].cursor, "ABC");

        let (_, count) = import_resume_cursors(&target, &payload).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn import_rejects_foreign_payloads() {
        let store = MemoryStore::new();
        let payload = |format: &str, version: u32| {
            json!({
                "format": format,
                "version": version,
                "collectionId": "1",
                "exportedAt": "",
                "resumeCursors": []
            })
        };
        assert!(matches!(
            import_resume_cursors(&store, &payload("other", 1)),
            Err(AmpooseError::InvalidArgs(_))
        ));
        assert!(matches!(
            import_resume_cursors(&store, &payload(RESUME_FORMAT, 2)),
            Err(AmpooseError::InvalidArgs(_))
        ));
    }
}
