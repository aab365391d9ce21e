use std::collections::BTreeMap;

#[cfg(feature = "graphql")]
use graphql_parser::query::{parse_query, Definition, OperationDefinition};
use serde_json::{Map, Value};
use url::Url;

use crate::path_query::scalar_id;

/// One outgoing network call as seen by the capture layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedRequest {
    pub method: String,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<ObservedBody>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedBody {
    /// Raw body text (form-encoded, JSON, or multipart).
    Text(String),
    /// Already-decoded form fields, e.g. HAR `postData.params`.
    Fields(Vec<(String, String)>),
}

/// A single GraphQL operation extracted from an observed call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationCall {
    pub raw_name: Option<String>,
    pub doc_id: Option<String>,
    pub variables: Map<String, Value>,
    /// Every other parameter, unsanitized.
    pub params: BTreeMap<String, String>,
}

const NAME_KEYS: &[&str] = &[
    "fb_api_req_friendly_name",
    "operationName",
    "query_name",
    "queryName",
];
const DOC_ID_KEYS: &[&str] = &["doc_id", "docID", "docId"];

type ParamSet = BTreeMap<String, Value>;

pub fn is_graphql_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains("graphql")
}

/// Extract every operation carried by `request`. Returns nothing for calls that
/// are not GraphQL or cannot be decoded; never fails.
pub fn extract_operation_calls(request: &ObservedRequest) -> Vec<OperationCall> {
    if !is_graphql_url(&request.url) {
        return Vec::new();
    }

    let mut shared: ParamSet = params_from_url(&request.url)
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let mut json_batch: Vec<ParamSet> = Vec::new();
    match &request.body {
        Some(ObservedBody::Fields(fields)) => {
            for (name, value) in fields {
                shared.insert(name.clone(), Value::String(value.clone()));
            }
        }
        Some(ObservedBody::Text(text)) => {
            apply_body_text(text, request.content_type.as_deref(), &mut shared, &mut json_batch);
        }
        None => {}
    }

    let mut calls = Vec::new();
    if json_batch.is_empty() {
        calls.extend(calls_from_param_set(&shared));
    } else {
        for item in json_batch {
            let mut merged = shared.clone();
            merged.extend(item);
            calls.extend(calls_from_param_set(&merged));
        }
    }
    calls
}

/// Interpret body text as form-urlencoded, then JSON, then multipart; the first
/// interpretation that yields a GraphQL-looking parameter set wins.
fn apply_body_text(
    text: &str,
    content_type: Option<&str>,
    shared: &mut ParamSet,
    json_batch: &mut Vec<ParamSet>,
) {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return;
    }

    if !is_multipart(content_type) && !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        let pairs = parse_urlencoded_pairs(text);
        if pairs.iter().any(|(k, _)| is_graphql_param(k)) {
            for (k, v) in pairs {
                shared.insert(k, Value::String(v));
            }
            return;
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match value {
            Value::Object(map) => {
                shared.extend(map);
                return;
            }
            Value::Array(items) => {
                json_batch.extend(items.into_iter().filter_map(|item| match item {
                    Value::Object(map) => Some(map.into_iter().collect()),
                    _ => None,
                }));
                if !json_batch.is_empty() {
                    return;
                }
            }
            _ => {}
        }
    }

    if let Some(fields) = parse_multipart_fields(text, content_type) {
        for (k, v) in fields {
            shared.insert(k, Value::String(v));
        }
    }
}

fn calls_from_param_set(params: &ParamSet) -> Vec<OperationCall> {
    if let Some(queries) = params.get("queries").and_then(as_object_value) {
        let outer: ParamSet = params
            .iter()
            .filter(|(k, _)| k.as_str() != "queries")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut calls = Vec::new();
        for sub in queries.values() {
            let Some(sub) = as_object_value(sub) else {
                continue;
            };
            let mut merged = outer.clone();
            for (k, v) in sub {
                let key = if k == "query_params" { "variables".to_string() } else { k };
                merged.insert(key, v);
            }
            calls.push(call_from_params(&merged));
        }
        return calls;
    }

    let call = call_from_params(params);
    if call.raw_name.is_none() && call.doc_id.is_none() {
        return Vec::new();
    }
    vec![call]
}

fn call_from_params(params: &ParamSet) -> OperationCall {
    let raw_name = NAME_KEYS
        .iter()
        .find_map(|key| params.get(*key).and_then(non_empty_str))
        .or_else(|| {
            params
                .get("query")
                .and_then(Value::as_str)
                .and_then(operation_name_from_query)
        });

    let doc_id = DOC_ID_KEYS
        .iter()
        .find_map(|key| params.get(*key).and_then(scalar_id));

    let variables = params
        .get("variables")
        .and_then(as_object_value)
        .unwrap_or_default();

    let rest = params
        .iter()
        .filter(|(k, _)| !NAME_KEYS.contains(&k.as_str()) && !DOC_ID_KEYS.contains(&k.as_str()))
        .filter(|(k, _)| k.as_str() != "variables")
        .map(|(k, v)| (k.clone(), value_to_param(v)))
        .collect();

    OperationCall {
        raw_name,
        doc_id,
        variables,
        params: rest,
    }
}

/// Accept both inline objects and JSON-encoded strings.
fn as_object_value(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_graphql_param(key: &str) -> bool {
    NAME_KEYS.contains(&key)
        || DOC_ID_KEYS.contains(&key)
        || matches!(key, "variables" | "queries" | "query")
}

#[cfg(feature = "graphql")]
fn operation_name_from_query(query: &str) -> Option<String> {
    let document = parse_query::<String>(query).ok()?;
    document.definitions.into_iter().find_map(|def| match def {
        Definition::Operation(OperationDefinition::Query(q)) => q.name,
        Definition::Operation(OperationDefinition::Mutation(m)) => m.name,
        Definition::Operation(OperationDefinition::Subscription(s)) => s.name,
        _ => None,
    })
}

#[cfg(not(feature = "graphql"))]
fn operation_name_from_query(_query: &str) -> Option<String> {
    None
}

fn is_multipart(mime: Option<&str>) -> bool {
    mime.is_some_and(|m| m.to_ascii_lowercase().contains("multipart/form-data"))
}

fn multipart_boundary(text: &str, content_type: Option<&str>) -> Option<String> {
    if let Some(ct) = content_type {
        if let Some(idx) = ct.to_ascii_lowercase().find("boundary=") {
            let raw = &ct[idx + "boundary=".len()..];
            let raw = raw.split(';').next().unwrap_or_default().trim().trim_matches('"');
            if !raw.is_empty() {
                return Some(raw.to_string());
            }
        }
    }
    let first = text.lines().next()?.trim();
    first.strip_prefix("--").filter(|b| !b.is_empty()).map(str::to_string)
}

/// Minimal multipart/form-data reader for text fields.
fn parse_multipart_fields(text: &str, content_type: Option<&str>) -> Option<Vec<(String, String)>> {
    let boundary = multipart_boundary(text, content_type)?;
    let delimiter = format!("--{boundary}");
    let mut fields = Vec::new();
    for part in text.split(delimiter.as_str()) {
        let part = part.trim_start_matches("\r\n").trim_start_matches('\n');
        if part.is_empty() || part.starts_with("--") {
            continue;
        }
        let (headers, value) = match part.split_once("\r\n\r\n") {
            Some(split) => split,
            None => match part.split_once("\n\n") {
                Some(split) => split,
                None => continue,
            },
        };
        let Some(name) = disposition_name(headers) else {
            continue;
        };
        let value = value
            .strip_suffix("\r\n")
            .or_else(|| value.strip_suffix('\n'))
            .unwrap_or(value);
        fields.push((name, value.to_string()));
    }
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn disposition_name(headers: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        if !line.to_ascii_lowercase().starts_with("content-disposition") {
            return None;
        }
        let idx = line.find("name=\"")?;
        let rest = &line[idx + "name=\"".len()..];
        let end = rest.find('"')?;
        Some(rest[..end].to_string())
    })
}

fn params_from_url(url: &str) -> Vec<(String, String)> {
    Url::parse(url)
        .ok()
        .map(|u| {
            u.query_pairs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn parse_urlencoded_pairs(text: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(text.trim().as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
