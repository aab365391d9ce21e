//! The persisted calibration artifact and its validation rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capture::CanonicalOp;
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::path_query::scalar_id;

pub const SCHEMA_VERSION: u32 = 1;

/// Store key holding the current artifact.
pub const CALIBRATION_KEY: &str = "graphql_calibration_v1";

/// Operations an export cannot run without.
pub const REQUIRED_OPS: &[CanonicalOp] = &[CanonicalOp::ProfileTimeline];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationEntry {
    pub query_name: CanonicalOp,
    pub doc_id: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub preload: Vec<Value>,
}

impl CalibrationEntry {
    /// Why this entry cannot be replayed, if it cannot.
    pub fn invalid_reason(&self) -> Option<String> {
        if self.doc_id.trim().is_empty() {
            return Some("docId is empty".to_string());
        }
        if self.query_name == CanonicalOp::ProfileTimeline {
            let has_id = self.variables.get("id").and_then(scalar_id).is_some();
            if !has_id {
                return Some("variables.id is missing".to_string());
            }
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_reason().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationArtifact {
    pub schema_version: u32,
    /// Epoch milliseconds.
    pub updated_at: i64,
    pub entries: BTreeMap<CanonicalOp, CalibrationEntry>,
}

impl CalibrationArtifact {
    /// Profile the calibrated timeline belongs to (`variables.id`).
    pub fn collection_id(&self) -> Option<String> {
        self.entries
            .get(&CanonicalOp::ProfileTimeline)
            .and_then(|entry| entry.variables.get("id"))
            .and_then(scalar_id)
    }
}

/// Result of checking one untyped entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryCheck {
    Valid(CalibrationEntry),
    Invalid { reason: String },
}

/// Validate an untyped entry stored under `op`. Never fails; bad input is
/// reported as [`EntryCheck::Invalid`].
pub fn validate_entry(op: CanonicalOp, raw: &Value) -> EntryCheck {
    let Some(obj) = raw.as_object() else {
        return EntryCheck::Invalid {
            reason: "entry is not an object".to_string(),
        };
    };
    let doc_id = ["docId", "doc_id", "docID"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(scalar_id))
        .unwrap_or_default();
    let variables = match obj.get("variables") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return EntryCheck::Invalid {
                reason: "variables is not an object".to_string(),
            }
        }
    };
    let request_params = obj
        .get("requestParams")
        .and_then(Value::as_object)
        .map(|params| {
            params
                .iter()
                .filter_map(|(k, v)| {
                    let text = scalar_id(v).or_else(|| v.as_bool().map(|b| b.to_string()))?;
                    Some((k.clone(), text))
                })
                .collect::<BTreeMap<_, _>>()
        })
        .filter(|params| !params.is_empty());
    let preload = obj
        .get("preload")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let entry = CalibrationEntry {
        query_name: op,
        doc_id,
        variables,
        request_params,
        preload,
    };
    match entry.invalid_reason() {
        Some(reason) => EntryCheck::Invalid { reason },
        None => EntryCheck::Valid(entry),
    }
}

/// Snapshot captured entries into a fresh artifact stamped with the current time.
pub fn build_graphql_artifact<I>(entries: I) -> CalibrationArtifact
where
    I: IntoIterator<Item = CalibrationEntry>,
{
    CalibrationArtifact {
        schema_version: SCHEMA_VERSION,
        updated_at: chrono::Utc::now().timestamp_millis(),
        entries: entries
            .into_iter()
            .map(|entry| (entry.query_name, entry))
            .collect(),
    }
}

/// Rebuild an artifact from untyped input: either the artifact object or a
/// string holding its JSON text. Invalid entries are dropped; anything that is
/// not recognisably an artifact yields `None`.
pub fn normalize_graphql_artifact(raw: &Value) -> Option<CalibrationArtifact> {
    let parsed;
    let value = match raw {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
        other => other,
    };
    let obj = value.as_object()?;

    let version = obj
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(SCHEMA_VERSION));
    if version != u64::from(SCHEMA_VERSION) {
        tracing::warn!(version, "ignoring calibration artifact with unknown schema version");
        return None;
    }
    let updated_at = obj.get("updatedAt").and_then(Value::as_i64).unwrap_or(0);

    let mut entries = BTreeMap::new();
    if let Some(raw_entries) = obj.get("entries").and_then(Value::as_object) {
        for (name, raw_entry) in raw_entries {
            let Some(op) = CanonicalOp::from_name(name) else {
                continue;
            };
            match validate_entry(op, raw_entry) {
                EntryCheck::Valid(entry) => {
                    entries.insert(op, entry);
                }
                EntryCheck::Invalid { reason } => {
                    tracing::debug!(op = %op, %reason, "dropping invalid calibration entry");
                }
            }
        }
    }

    Some(CalibrationArtifact {
        schema_version: SCHEMA_VERSION,
        updated_at,
        entries,
    })
}

/// Required operations that are absent or invalid in `artifact`.
pub fn get_missing_required_queries(artifact: Option<&CalibrationArtifact>) -> Vec<CanonicalOp> {
    REQUIRED_OPS
        .iter()
        .copied()
        .filter(|op| {
            !artifact
                .and_then(|a| a.entries.get(op))
                .is_some_and(CalibrationEntry::is_valid)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationStatus {
    Missing,
    Incomplete(Vec<CanonicalOp>),
    Ready,
}

impl CalibrationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CalibrationStatus::Missing => "missing",
            CalibrationStatus::Incomplete(_) => "incomplete",
            CalibrationStatus::Ready => "ready",
        }
    }
}

pub fn calibration_status(artifact: Option<&CalibrationArtifact>) -> CalibrationStatus {
    match artifact {
        None => CalibrationStatus::Missing,
        Some(a) if a.entries.is_empty() => CalibrationStatus::Missing,
        Some(a) => {
            let missing = get_missing_required_queries(Some(a));
            if missing.is_empty() {
                CalibrationStatus::Ready
            } else {
                CalibrationStatus::Incomplete(missing)
            }
        }
    }
}

pub fn load_artifact(store: &dyn KeyValueStore) -> Result<Option<CalibrationArtifact>> {
    Ok(store
        .get(CALIBRATION_KEY)?
        .as_ref()
        .and_then(normalize_graphql_artifact))
}

/// Replace whatever artifact was stored before.
pub fn save_artifact(store: &dyn KeyValueStore, artifact: &CalibrationArtifact) -> Result<()> {
    store.set(CALIBRATION_KEY, &serde_json::to_value(artifact)?)
}

pub fn op_names(ops: &[CanonicalOp]) -> Vec<String> {
    ops.iter().map(|op| op.name().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    fn timeline_entry(variables: Value) -> CalibrationEntry {
        CalibrationEntry {
            query_name: CanonicalOp::ProfileTimeline,
            doc_id: "9001".into(),
            variables: variables.as_object().cloned().unwrap_or_default(),
            request_params: None,
            preload: Vec::new(),
        }
    }

    #[test]
    fn timeline_requires_non_empty_id() {
        let empty_ids = [
            json!({}),
            json!({"id": ""}),
            json!({"id": "   "}),
            json!({"id": null}),
            json!({"id": []}),
        ];
        for vars in empty_ids {
            let artifact = build_graphql_artifact([timeline_entry(vars.clone())]);
            assert_eq!(
                get_missing_required_queries(Some(&artifact)),
                vec![CanonicalOp::ProfileTimeline],
                "vars {vars}"
            );
        }
        for vars in [json!({"id": "1000"}), json!({"id": 1000})] {
            let artifact = build_graphql_artifact([timeline_entry(vars)]);
            assert!(get_missing_required_queries(Some(&artifact)).is_empty());
        }
        assert_eq!(get_missing_required_queries(None), vec![CanonicalOp::ProfileTimeline]);
    }

    #[test]
    fn normalize_reproduces_built_entries_from_json_text() {
        let mut params = BTreeMap::new();
        params.insert(
            "__crn".to_string(),
            "comet.fbweb.CometProfileTimelineListViewRoute".to_string(),
        );
        let timeline = CalibrationEntry {
            request_params: Some(params),
            preload: vec![json!({"count": 3})],
            ..timeline_entry(json!({"id": "1000", "scale": 2}))
        };
        let single = CalibrationEntry {
            query_name: CanonicalOp::SinglePost,
            doc_id: "42".into(),
            variables: Map::new(),
            request_params: None,
            preload: Vec::new(),
        };
        let built = build_graphql_artifact([timeline, single]);
        let text = serde_json::to_string(&built).unwrap();

        let normalized = normalize_graphql_artifact(&Value::String(text)).unwrap();
        assert_eq!(normalized, built);
    }

    #[test]
    fn normalize_drops_invalid_entries_and_unknown_ops() {
        let raw = json!({
            "schemaVersion": 1,
            "updatedAt": 5,
            "entries": {
                "ProfileCometTimelineFeedRefetchQuery": {
                    "queryName": "ProfileCometTimelineFeedRefetchQuery",
                    "docId": "",
                    "variables": {"id": "1"}
                },
                "CometSinglePostContentQuery": {"docId": 77, "variables": {"storyID": "x"}},
                "SomethingElse": {"docId": "3"}
            }
        });
        let artifact = normalize_graphql_artifact(&raw).unwrap();
        assert_eq!(artifact.entries.len(), 1);
        assert_eq!(artifact.entries[&CanonicalOp::SinglePost].doc_id, "77");
        assert_eq!(
            calibration_status(Some(&artifact)),
            CalibrationStatus::Incomplete(vec![CanonicalOp::ProfileTimeline])
        );
    }

    #[test]
    fn normalize_is_total() {
        assert!(normalize_graphql_artifact(&json!(null)).is_none());
        assert!(normalize_graphql_artifact(&json!("not json")).is_none());
        assert!(normalize_graphql_artifact(&json!({"schemaVersion": 7, "entries": {}})).is_none());
        let empty = normalize_graphql_artifact(&json!({"entries": "nope"})).unwrap();
        assert_eq!(calibration_status(Some(&empty)), CalibrationStatus::Missing);
    }

    #[test]
    fn save_replaces_previous_artifact() {
        let store = MemoryStore::new();
        assert!(load_artifact(&store).unwrap().is_none());

        for id in ["1", "2"] {
            let artifact = build_graphql_artifact([timeline_entry(json!({"id": id}))]);
            save_artifact(&store, &artifact).unwrap();
        }

        let loaded = load_artifact(&store).unwrap().unwrap();
        assert_eq!(
            loaded.entries[&CanonicalOp::ProfileTimeline].variables["id"],
            json!("2")
        );
        assert_eq!(calibration_status(Some(&loaded)), CalibrationStatus::Ready);
    }
}
