//! Passive calibration capture.
//!
//! The capture manager never issues requests of its own. Traffic reaches it
//! through [`CapturingTransport`] (a decorator around any [`Transport`]), from
//! HAR entries, or from a live DevTools session; each GraphQL call is reduced
//! to a sanitized [`CalibrationEntry`] keyed by canonical operation.

mod canonical;
mod extract;
mod sanitize;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::artifact::{
    build_graphql_artifact, get_missing_required_queries, CalibrationArtifact, CalibrationEntry,
};
use crate::client::{AbortSignal, FetchRequest, FetchResponse, Transport};
use crate::error::Result;

pub use canonical::{canonicalize_op_name, CanonicalOp};
pub use extract::{
    extract_operation_calls, is_graphql_url, ObservedBody, ObservedRequest, OperationCall,
};
pub use sanitize::{is_token_like, sanitize_request_params, sanitize_variables};

/// Distinct variable shapes kept per operation besides the primary one.
const MAX_PRELOAD: usize = 5;

#[derive(Default)]
struct CaptureState {
    hooks_installed: bool,
    active: bool,
    automation_running: bool,
    captures: BTreeMap<CanonicalOp, CalibrationEntry>,
    unmatched: BTreeSet<String>,
    observed_calls: usize,
}

/// Accumulates calibration captures. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct CaptureManager {
    inner: Arc<Mutex<CaptureState>>,
}

/// Outcome of waiting for the required operations to show up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationWait {
    Ready,
    TimedOut { missing: Vec<CanonicalOp> },
    Aborted { missing: Vec<CanonicalOp> },
}

impl CaptureManager {
    pub fn new() -> Self {
        Self::default()
    }

    // Capture paths must never fail, so a poisoned lock is recovered.
    fn state(&self) -> MutexGuard<'_, CaptureState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install hooks (first call only), clear previous captures and begin observing.
    pub fn start(&self) {
        let mut state = self.state();
        if !state.hooks_installed {
            state.hooks_installed = true;
            tracing::debug!("capture hooks installed");
        }
        state.captures.clear();
        state.unmatched.clear();
        state.observed_calls = 0;
        state.active = true;
    }

    /// Resume observing without clearing what was captured so far.
    pub fn enable(&self) {
        let mut state = self.state();
        state.hooks_installed = true;
        state.active = true;
    }

    /// Stop observing. Hooks stay installed; captures are kept.
    pub fn stop(&self) {
        self.state().active = false;
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn hooks_installed(&self) -> bool {
        self.state().hooks_installed
    }

    /// Claim the single calibration-automation slot. When a task already holds
    /// it, capture is re-enabled and `None` is returned.
    pub fn begin_automation(&self) -> Option<AutomationGuard> {
        let mut state = self.state();
        state.hooks_installed = true;
        state.active = true;
        if state.automation_running {
            return None;
        }
        state.automation_running = true;
        Some(AutomationGuard {
            manager: self.clone(),
        })
    }

    /// Feed one observed call. Non-GraphQL and undecodable calls are ignored.
    pub fn observe(&self, request: &ObservedRequest) {
        if !self.is_active() || !is_graphql_url(&request.url) {
            return;
        }
        let calls = extract_operation_calls(request);
        let mut state = self.state();
        state.observed_calls += 1;
        for call in calls {
            record_call(&mut state, call);
        }
    }

    /// Snapshot the capture map into an artifact; capture state is untouched.
    pub fn build_artifact(&self) -> CalibrationArtifact {
        let state = self.state();
        build_graphql_artifact(state.captures.values().cloned())
    }

    /// Required operations that are absent or invalid in the current snapshot.
    pub fn get_missing(&self) -> Vec<CanonicalOp> {
        get_missing_required_queries(Some(&self.build_artifact()))
    }

    pub fn captured_ops(&self) -> Vec<CanonicalOp> {
        self.state().captures.keys().copied().collect()
    }

    pub fn unmatched(&self) -> Vec<String> {
        self.state().unmatched.iter().cloned().collect()
    }

    pub fn observed_calls(&self) -> usize {
        self.state().observed_calls
    }

    /// Poll until every required operation is captured, `timeout` elapses, or
    /// `abort` fires. `tick` runs between polls (auto-scroll, socket pumping).
    pub fn wait_for_required<F>(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        abort: &AbortSignal,
        mut tick: F,
    ) -> CalibrationWait
    where
        F: FnMut(),
    {
        let started = Instant::now();
        loop {
            let missing = self.get_missing();
            if missing.is_empty() {
                return CalibrationWait::Ready;
            }
            if abort.is_aborted() {
                return CalibrationWait::Aborted { missing };
            }
            if started.elapsed() >= timeout {
                tracing::warn!(
                    missing = ?missing,
                    "calibration timed out; continuing with partial capture"
                );
                return CalibrationWait::TimedOut { missing };
            }
            tick();
            thread::sleep(poll_interval.min(timeout.saturating_sub(started.elapsed())));
        }
    }

    /// Wrap `inner` so every request it sends is observed first.
    pub fn intercept<T: Transport>(&self, inner: T) -> CapturingTransport<T> {
        self.enable();
        CapturingTransport {
            inner,
            manager: self.clone(),
        }
    }
}

fn record_call(state: &mut CaptureState, call: OperationCall) {
    let Some(raw_name) = call.raw_name.clone() else {
        return;
    };
    let Some(op) = canonicalize_op_name(&raw_name) else {
        tracing::debug!(name = %raw_name, "unmatched graphql operation");
        state.unmatched.insert(raw_name);
        return;
    };
    let Some(doc_id) = call.doc_id.clone().filter(|d| !d.trim().is_empty()) else {
        tracing::debug!(op = %op, "graphql call without doc id");
        return;
    };

    let params = sanitize_request_params(&call.params);
    let candidate = CalibrationEntry {
        query_name: op,
        doc_id,
        variables: sanitize_variables(&call.variables),
        request_params: if params.is_empty() { None } else { Some(params) },
        preload: Vec::new(),
    };
    let candidate_valid = candidate.is_valid();

    match state.captures.get_mut(&op) {
        Some(existing) => {
            if existing.is_valid() && !candidate_valid {
                remember_variables(existing, &candidate.variables);
                return;
            }
            let mut preload = std::mem::take(&mut existing.preload);
            let previous = Value::Object(existing.variables.clone());
            if previous != Value::Object(candidate.variables.clone())
                && !preload.contains(&previous)
            {
                preload.insert(0, previous);
            }
            preload.truncate(MAX_PRELOAD);
            *existing = CalibrationEntry { preload, ..candidate };
        }
        None => {
            state.captures.insert(op, candidate);
        }
    }
}

fn remember_variables(entry: &mut CalibrationEntry, variables: &serde_json::Map<String, Value>) {
    let value = Value::Object(variables.clone());
    if value != Value::Object(entry.variables.clone()) && !entry.preload.contains(&value) {
        entry.preload.insert(0, value);
        entry.preload.truncate(MAX_PRELOAD);
    }
}

/// Releases the automation slot on drop.
pub struct AutomationGuard {
    manager: CaptureManager,
}

impl Drop for AutomationGuard {
    fn drop(&mut self) {
        self.manager.state().automation_running = false;
    }
}

/// Transport decorator that reports outgoing calls to a [`CaptureManager`].
pub struct CapturingTransport<T> {
    inner: T,
    manager: CaptureManager,
}

impl<T: Transport> Transport for CapturingTransport<T> {
    fn fetch(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<FetchResponse> {
        self.manager.observe(&ObservedRequest::from(request));
        self.inner.fetch(request, abort)
    }
}

impl From<&FetchRequest> for ObservedRequest {
    fn from(request: &FetchRequest) -> Self {
        let content_type = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone());
        ObservedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            content_type,
            body: request.body.clone().map(ObservedBody::Text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timeline_call(doc_id: &str, variables: Value) -> ObservedRequest {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("fb_api_req_friendly_name", "ProfileCometTimelineFeedRefetchQuery")
            .append_pair("doc_id", doc_id)
            .append_pair("variables", &variables.to_string())
            .append_pair("fb_dtsg", "stale-token")
            .append_pair("__crn", "comet.fbweb.CometProfileTimelineListViewRoute")
            .finish();
        ObservedRequest {
            method: "POST".into(),
            url: "https://www.facebook.com/api/graphql/".into(),
            content_type: Some("application/x-www-form-urlencoded".into()),
            body: Some(ObservedBody::Text(body)),
        }
    }

    #[test]
    fn captures_sanitized_timeline_entry() {
        let manager = CaptureManager::new();
        manager.start();
        manager.observe(&timeline_call(
            "777",
            json!({"id": "1000", "count": 3, "cursor": "abc"}),
        ));

        let artifact = manager.build_artifact();
        let entry = &artifact.entries[&CanonicalOp::ProfileTimeline];
        assert_eq!(entry.doc_id, "777");
        assert_eq!(Value::Object(entry.variables.clone()), json!({"id": "1000", "count": 3}));
        let params = entry.request_params.as_ref().unwrap();
        assert!(params.contains_key("__crn"));
        assert!(!params.contains_key("fb_dtsg"));
        assert!(manager.get_missing().is_empty());
    }

    #[test]
    fn intercepted_client_requests_are_captured() {
        use crate::client::testing::{ready_store, ScriptedTransport};
        use crate::client::{EndpointConfig, HostSnapshot, QueryClient, QueryRequest};

        let manager = CaptureManager::new();
        manager.start();
        let scripted = ScriptedTransport::new();
        scripted.push_body(r#"{"data":{"ok":true}}"#);
        let mut host = HostSnapshot::default();
        host.inputs.insert("fb_dtsg".into(), "live-token".into());
        let client = QueryClient::new(
            manager.intercept(scripted.clone()),
            Arc::new(host),
            ready_store(),
            EndpointConfig::default(),
        );

        let mut vars = serde_json::Map::new();
        vars.insert("cursor".into(), json!("C9"));
        client
            .request(
                &QueryRequest::new(CanonicalOp::ProfileTimeline).variables(vars),
                &AbortSignal::new(),
            )
            .unwrap();

        assert_eq!(scripted.requests().len(), 1);
        assert_eq!(manager.observed_calls(), 1);
        let artifact = manager.build_artifact();
        let entry = &artifact.entries[&CanonicalOp::ProfileTimeline];
        assert_eq!(entry.doc_id, "777");
        assert_eq!(Value::Object(entry.variables.clone()), json!({"id": "1000"}));
        let params = entry.request_params.as_ref().unwrap();
        assert!(params.contains_key("__crn"));
        assert!(!params.contains_key("fb_dtsg"));
    }

    #[test]
    fn ignores_traffic_until_started_and_after_stop() {
        let manager = CaptureManager::new();
        manager.observe(&timeline_call("1", json!({"id": "1"})));
        assert!(manager.captured_ops().is_empty());

        manager.start();
        manager.stop();
        manager.observe(&timeline_call("1", json!({"id": "1"})));
        assert!(manager.captured_ops().is_empty());
        assert!(manager.hooks_installed());
    }

    #[test]
    fn unmatched_names_are_recorded_separately() {
        let manager = CaptureManager::new();
        manager.start();
        manager.observe(&ObservedRequest {
            method: "POST".into(),
            url: "https://www.facebook.com/api/graphql/".into(),
            content_type: Some("application/x-www-form-urlencoded".into()),
            body: Some(ObservedBody::Text(
                "fb_api_req_friendly_name=CometNotificationsDropdownQuery&doc_id=5".into(),
            )),
        });
        assert!(manager.captured_ops().is_empty());
        assert_eq!(manager.unmatched(), vec!["CometNotificationsDropdownQuery".to_string()]);
    }

    #[test]
    fn valid_capture_is_not_replaced_by_invalid_one() {
        let manager = CaptureManager::new();
        manager.start();
        manager.observe(&timeline_call("1", json!({"id": "1000"})));
        manager.observe(&timeline_call("2", json!({"count": 3})));

        let artifact = manager.build_artifact();
        let entry = &artifact.entries[&CanonicalOp::ProfileTimeline];
        assert_eq!(entry.doc_id, "1");
        assert_eq!(entry.preload, vec![json!({"count": 3})]);
    }

    #[test]
    fn start_clears_previous_captures_and_build_is_pure() {
        let manager = CaptureManager::new();
        manager.start();
        manager.observe(&timeline_call("1", json!({"id": "1000"})));
        let first = manager.build_artifact();
        let second = manager.build_artifact();
        assert_eq!(first.entries, second.entries);

        manager.start();
        assert!(manager.captured_ops().is_empty());
        assert_eq!(manager.get_missing(), vec![CanonicalOp::ProfileTimeline]);
    }

    #[test]
    fn automation_slot_is_exclusive() {
        let manager = CaptureManager::new();
        let guard = manager.begin_automation();
        assert!(guard.is_some());
        assert!(manager.begin_automation().is_none());
        assert!(manager.is_active());
        drop(guard);
        assert!(manager.begin_automation().is_some());
    }

    #[test]
    fn wait_reports_timeout_with_missing_ops() {
        let manager = CaptureManager::new();
        manager.start();
        let outcome = manager.wait_for_required(
            Duration::from_millis(20),
            Duration::from_millis(5),
            &AbortSignal::new(),
            || {},
        );
        assert_eq!(
            outcome,
            CalibrationWait::TimedOut {
                missing: vec![CanonicalOp::ProfileTimeline]
            }
        );
    }
}
