//! Replays calibrated GraphQL operations.
//!
//! Each request walks `endpoint x parameter-variant` combinations in order and
//! returns on the first response that is both HTTP-ok and parseable.

mod ambient;
mod endpoints;
mod response;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::artifact::{get_missing_required_queries, load_artifact, op_names};
use crate::capture::CanonicalOp;
use crate::db::KeyValueStore;
use crate::error::{AmpooseError, Result};

pub use ambient::{
    compute_ambient_params, jazoest, parse_cookie_header, HostPage, HostSnapshot, SnapshotFile,
};
pub use endpoints::{candidate_endpoints, param_variants, EndpointConfig};
pub use response::{parse_graphql_body, GraphqlPayload, ResponseMode};
pub use transport::{AbortSignal, FetchRequest, FetchResponse, Transport, UreqTransport};

/// How many attempt failures the aggregated error quotes.
const REPORTED_FAILURES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub op: CanonicalOp,
    /// Merged over the captured variables; these win on collision.
    pub variables: Map<String, Value>,
    pub endpoint: Option<String>,
    pub response_mode: ResponseMode,
}

impl QueryRequest {
    pub fn new(op: CanonicalOp) -> Self {
        Self {
            op,
            variables: Map::new(),
            endpoint: None,
            response_mode: ResponseMode::Single,
        }
    }

    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }
}

/// One failed `endpoint x params` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub endpoint: String,
    pub param_count: usize,
    pub error: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} params): {}", self.endpoint, self.param_count, self.error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub payload: GraphqlPayload,
    pub endpoint: String,
    /// Attempts that failed before the one that succeeded.
    pub failures: Vec<AttemptFailure>,
}

pub struct QueryClient {
    transport: Box<dyn Transport>,
    host: Arc<dyn HostPage>,
    store: Arc<dyn KeyValueStore>,
    endpoints: EndpointConfig,
}

impl QueryClient {
    pub fn new<T>(
        transport: T,
        host: Arc<dyn HostPage>,
        store: Arc<dyn KeyValueStore>,
        endpoints: EndpointConfig,
    ) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            transport: Box::new(transport),
            host,
            store,
            endpoints,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn request(&self, request: &QueryRequest, abort: &AbortSignal) -> Result<QueryResponse> {
        let artifact = load_artifact(self.store.as_ref())?;
        let missing = get_missing_required_queries(artifact.as_ref());
        if !missing.is_empty() {
            return Err(AmpooseError::MissingCalibration(op_names(&missing)));
        }
        let entry = artifact
            .as_ref()
            .and_then(|a| a.entries.get(&request.op))
            .filter(|e| e.is_valid())
            .ok_or_else(|| AmpooseError::MissingCalibration(vec![request.op.name().to_string()]))?;

        let mut variables = entry.variables.clone();
        variables.extend(request.variables.clone());
        let variables_json = serde_json::to_string(&Value::Object(variables))?;

        let ambient = compute_ambient_params(self.host.as_ref());
        let captured = entry.request_params.clone().unwrap_or_default();
        let variants = param_variants(&captured, &ambient);

        let mut config = self.endpoints.clone();
        if let Some(page_url) = self.host.page_url() {
            config.page_url = page_url;
        }
        let endpoints = candidate_endpoints(&config, request.endpoint.as_deref())?;

        let mut failures: Vec<AttemptFailure> = Vec::new();
        for endpoint in &endpoints {
            for params in &variants {
                abort.check()?;
                let fetch =
                    build_fetch(endpoint, params, request.op, &entry.doc_id, &variables_json);
                let outcome = self
                    .transport
                    .fetch(&fetch, abort)
                    .and_then(|resp| {
                        if resp.ok() {
                            parse_graphql_body(&resp.body, request.response_mode)
                        } else {
                            Err(AmpooseError::Transport(format!("HTTP {}", resp.status)))
                        }
                    });
                match outcome {
                    Ok(payload) => {
                        tracing::debug!(
                            op = %request.op,
                            %endpoint,
                            params = params.len(),
                            "graphql request succeeded"
                        );
                        return Ok(QueryResponse {
                            payload,
                            endpoint: endpoint.clone(),
                            failures,
                        });
                    }
                    Err(AmpooseError::Aborted) => return Err(AmpooseError::Aborted),
                    Err(err) => {
                        tracing::warn!(
                            op = %request.op,
                            %endpoint,
                            params = params.len(),
                            error = %err,
                            "graphql attempt failed"
                        );
                        failures.push(AttemptFailure {
                            endpoint: endpoint.clone(),
                            param_count: params.len(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        let summary = failures
            .iter()
            .take(REPORTED_FAILURES)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(AmpooseError::RequestFailed(format!(
            "{} after {} attempts: {summary}",
            request.op,
            failures.len()
        )))
    }
}

fn build_fetch(
    endpoint: &str,
    params: &BTreeMap<String, String>,
    op: CanonicalOp,
    doc_id: &str,
    variables_json: &str,
) -> FetchRequest {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        form.append_pair(key, value);
    }
    // Identity fields go out even with the empty parameter variant.
    form.append_pair("fb_api_req_friendly_name", op.name());
    if !params.contains_key("fb_api_caller_class") {
        form.append_pair("fb_api_caller_class", "RelayModern");
    }
    if !params.contains_key("server_timestamps") {
        form.append_pair("server_timestamps", "true");
    }
    form.append_pair("doc_id", doc_id);
    form.append_pair("variables", variables_json);

    let mut headers = vec![
        (
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        ),
        ("x-fb-friendly-name".to_string(), op.name().to_string()),
    ];
    if let Some(lsd) = params.get("lsd") {
        headers.push(("x-fb-lsd".to_string(), lsd.clone()));
    }

    FetchRequest {
        method: "POST".to_string(),
        url: endpoint.to_string(),
        headers,
        body: Some(form.finish()),
        include_credentials: true,
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ready_store, ScriptedTransport};
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    fn client(
        transport: ScriptedTransport,
        store: Arc<dyn KeyValueStore>,
        host: HostSnapshot,
    ) -> QueryClient {
        QueryClient::new(transport, Arc::new(host), store, EndpointConfig::default())
    }

    fn form_of(request: &FetchRequest) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(request.body.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    #[test]
    fn missing_calibration_fails_before_any_request() {
        let transport = ScriptedTransport::new();
        let client = client(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            HostSnapshot::default(),
        );
        let err = client
            .request(&QueryRequest::new(CanonicalOp::ProfileTimeline), &AbortSignal::new())
            .unwrap_err();
        let AmpooseError::MissingCalibration(ops) = err else {
            panic!("expected missing calibration, got {err:?}");
        };
        assert_eq!(ops, ["ProfileCometTimelineFeedRefetchQuery"]);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn caller_variables_win_and_ambient_params_are_fresh() {
        let transport = ScriptedTransport::new();
        transport.push_body(r#"{"data":{"ok":true}}"#);
        let mut host = HostSnapshot::default();
        host.inputs.insert("fb_dtsg".into(), "abc".into());
        let client = client(transport.clone(), ready_store(), host);

        let mut vars = Map::new();
        vars.insert("cursor".into(), json!("C1"));
        vars.insert("count".into(), json!(9));
        let response = client
            .request(
                &QueryRequest::new(CanonicalOp::ProfileTimeline).variables(vars),
                &AbortSignal::new(),
            )
            .unwrap();
        assert_eq!(response.payload, GraphqlPayload::Single(json!({"data": {"ok": true}})));
        assert!(response.failures.is_empty());

        let sent = transport.requests();
        let form = form_of(&sent[0]);
        assert_eq!(form["doc_id"], "777");
        assert_eq!(form["fb_dtsg"], "abc");
        assert_eq!(form["jazoest"], "2294");
        assert_eq!(form["__crn"], "comet.fbweb.CometProfileTimelineListViewRoute");
        let variables: Value = serde_json::from_str(&form["variables"]).unwrap();
        assert_eq!(variables, json!({"id": "1000", "count": 9, "cursor": "C1"}));
    }

    #[test]
    fn retries_same_endpoint_with_reduced_params() {
        let transport = ScriptedTransport::new();
        transport.push_status(500, "");
        transport.push_body("");
        transport.push_body(r#"{"data":{"ok":1}}"#);
        let client = client(transport.clone(), ready_store(), HostSnapshot::default());

        let response = client
            .request(&QueryRequest::new(CanonicalOp::ProfileTimeline), &AbortSignal::new())
            .unwrap();
        assert_eq!(response.failures.len(), 2);
        assert_eq!(response.endpoint, "https://www.facebook.com/api/graphql/");

        let sent = transport.requests();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|r| r.url == "https://www.facebook.com/api/graphql/"));
        assert!(form_of(&sent[0]).contains_key("__crn"));
        assert!(!form_of(&sent[1]).contains_key("__crn"));
        let last = form_of(&sent[2]);
        assert!(!last.contains_key("__a"));
        assert_eq!(last["fb_api_req_friendly_name"], "ProfileCometTimelineFeedRefetchQuery");
        assert_eq!(last["doc_id"], "777");
    }

    #[test]
    fn exhaustion_reports_first_three_failures() {
        let transport = ScriptedTransport::new();
        for _ in 0..6 {
            transport.push_status(503, "busy");
        }
        let client = client(transport.clone(), ready_store(), HostSnapshot::default());
        let err = client
            .request(&QueryRequest::new(CanonicalOp::ProfileTimeline), &AbortSignal::new())
            .unwrap_err();
        let AmpooseError::RequestFailed(message) = err else {
            panic!("expected aggregated failure, got {err:?}");
        };
        assert!(message.contains("after 6 attempts"));
        assert_eq!(message.matches("HTTP 503").count(), 3);
        assert!(message.contains("https://www.facebook.com/api/graphql/ (5 params): HTTP 503"));
        assert_eq!(transport.requests().len(), 6);
    }

    fn client_for(transport: &ScriptedTransport, endpoints: EndpointConfig) -> QueryClient {
        QueryClient::new(
            transport.clone(),
            Arc::new(HostSnapshot::default()),
            ready_store(),
            endpoints,
        )
    }

    fn tried_urls(transport: &ScriptedTransport) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for request in transport.requests() {
            if urls.last() != Some(&request.url) {
                urls.push(request.url);
            }
        }
        urls
    }

    #[test]
    fn falls_through_to_mirror_fallbacks() {
        let transport = ScriptedTransport::new();
        for _ in 0..6 {
            transport.push_status(502, "");
        }
        transport.push_body(r#"{"data":{"ok":true}}"#);
        let client = client_for(
            &transport,
            EndpointConfig {
                page_url: "https://web.facebook.com/profile.php?id=1000".into(),
                ..EndpointConfig::default()
            },
        );

        let response = client
            .request(&QueryRequest::new(CanonicalOp::ProfileTimeline), &AbortSignal::new())
            .unwrap();
        assert_eq!(response.endpoint, "https://www.facebook.com/api/graphql/");
        assert_eq!(response.failures.len(), 6);
        assert_eq!(
            tried_urls(&transport),
            vec![
                "https://web.facebook.com/api/graphql/",
                "https://web.facebook.com/graphql/",
                "https://www.facebook.com/api/graphql/",
            ]
        );
    }

    #[test]
    fn falls_through_to_cross_origin_endpoint() {
        let transport = ScriptedTransport::new();
        for _ in 0..6 {
            transport.push_status(500, "");
        }
        transport.push_body(r#"{"data":{"ok":true}}"#);
        let client = client_for(
            &transport,
            EndpointConfig {
                origin: Some("https://business.facebook.com".into()),
                ..EndpointConfig::default()
            },
        );

        let response = client
            .request(&QueryRequest::new(CanonicalOp::ProfileTimeline), &AbortSignal::new())
            .unwrap();
        assert_eq!(response.endpoint, "https://business.facebook.com/api/graphql/");
        assert_eq!(
            tried_urls(&transport),
            vec![
                "https://www.facebook.com/api/graphql/",
                "https://www.facebook.com/graphql/",
                "https://business.facebook.com/api/graphql/",
            ]
        );
    }

    #[test]
    fn pinned_endpoint_is_the_only_target() {
        let transport = ScriptedTransport::new();
        transport.push_body(r#"{"data":{}}"#);
        let client = client(transport.clone(), ready_store(), HostSnapshot::default());
        client
            .request(
                &QueryRequest::new(CanonicalOp::ProfileTimeline)
                    .endpoint(Some("https://example.test/gql".into())),
                &AbortSignal::new(),
            )
            .unwrap();
        assert_eq!(transport.requests()[0].url, "https://example.test/gql");
    }

    #[test]
    fn aborted_signal_stops_attempts() {
        let transport = ScriptedTransport::new();
        let client = client(transport.clone(), ready_store(), HostSnapshot::default());
        let abort = AbortSignal::new();
        abort.abort();
        let err = client
            .request(&QueryRequest::new(CanonicalOp::ProfileTimeline), &abort)
            .unwrap_err();
        assert!(matches!(err, AmpooseError::Aborted));
        assert!(transport.requests().is_empty());
    }
}
