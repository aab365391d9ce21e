//! Test doubles shared by the client, timeline and export tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::json;

use super::{AbortSignal, FetchRequest, FetchResponse, Transport};
use crate::artifact::{build_graphql_artifact, save_artifact, CalibrationEntry};
use crate::capture::CanonicalOp;
use crate::db::{KeyValueStore, MemoryStore};
use crate::error::{AmpooseError, Result};

type Hook = Box<dyn Fn(&FetchRequest) + Send>;

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<FetchResponse>>,
    requests: Vec<FetchRequest>,
    on_fetch: Option<Hook>,
}

/// Replays queued responses in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<FetchResponse>) {
        self.script.lock().unwrap().responses.push_back(response);
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(FetchResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_body(&self, body: &str) {
        self.push_status(200, body);
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push_body(&value.to_string());
    }

    /// Run `hook` on every request before answering it.
    pub fn on_fetch(&self, hook: impl Fn(&FetchRequest) + Send + 'static) {
        self.script.lock().unwrap().on_fetch = Some(Box::new(hook));
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.script.lock().unwrap().requests.clone()
    }
}

impl Transport for ScriptedTransport {
    fn fetch(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<FetchResponse> {
        abort.check()?;
        let mut script = self.script.lock().unwrap();
        script.requests.push(request.clone());
        if let Some(hook) = &script.on_fetch {
            hook(request);
        }
        let response = script
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(AmpooseError::Transport("no scripted response".into())));
        drop(script);
        abort.check()?;
        response
    }
}

pub fn timeline_entry() -> CalibrationEntry {
    let mut params = BTreeMap::new();
    params.insert(
        "__crn".to_string(),
        "comet.fbweb.CometProfileTimelineListViewRoute".to_string(),
    );
    CalibrationEntry {
        query_name: CanonicalOp::ProfileTimeline,
        doc_id: "777".to_string(),
        variables: json!({"id": "1000"}).as_object().cloned().unwrap_or_default(),
        request_params: Some(params),
        preload: Vec::new(),
    }
}

pub fn single_post_entry() -> CalibrationEntry {
    CalibrationEntry {
        query_name: CanonicalOp::SinglePost,
        doc_id: "888".to_string(),
        variables: json!({"scale": 2}).as_object().cloned().unwrap_or_default(),
        request_params: None,
        preload: Vec::new(),
    }
}

/// A memory store holding a ready calibration artifact.
pub fn ready_store() -> Arc<dyn KeyValueStore> {
    let store = MemoryStore::new();
    save_artifact(&store, &build_graphql_artifact([timeline_entry(), single_post_entry()]))
        .unwrap();
    Arc::new(store)
}
