use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

/// Variable keys that carry pagination position rather than query identity.
const CURSOR_KEYS: &[&str] = &[
    "cursor",
    "after",
    "before",
    "end_cursor",
    "start_cursor",
    "endcursor",
    "startcursor",
];

/// Keys that identify one concrete story; replaying them would pin every page
/// to the post that happened to be on screen during calibration.
const STORY_ID_KEYS: &[&str] = &[
    "storyid",
    "story_id",
    "feedbackid",
    "feedback_id",
    "focusedcommentid",
];

/// Session, auth and client-internal request parameters never kept as
/// `requestParams`; fresh values come from the host page on every request.
const REQUEST_PARAM_DENY_LIST: &[&str] = &[
    "fb_dtsg",
    "fb_dtsg_ag",
    "jazoest",
    "lsd",
    "__user",
    "av",
    "__a",
    "__req",
    "__hs",
    "__hsi",
    "__dyn",
    "__csr",
    "__rev",
    "__s",
    "__ccg",
    "__comet_req",
    "__spin_r",
    "__spin_b",
    "__spin_t",
    "__jssesw",
    "access_token",
    "csrf_token",
    "csrftoken",
    "x-fb-lsd",
    "dpr",
];

/// Keys describing the GraphQL call itself; these are rebuilt per request.
const GRAPHQL_IDENTITY_KEYS: &[&str] = &[
    "doc_id",
    "docid",
    "variables",
    "fb_api_req_friendly_name",
    "fb_api_caller_class",
    "operationname",
    "query_name",
    "queryname",
    "queries",
    "query",
    "server_timestamps",
    "extensions",
];

static TOKEN_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"token|dtsg|csrf|jazoest|^lsd$|secret|password|session|signature|nonce")
        .case_insensitive(true)
        .build()
        .expect("token pattern is valid")
});

fn is_cursor_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    CURSOR_KEYS.contains(&lower.as_str())
}

fn is_story_id_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    STORY_ID_KEYS.contains(&lower.as_str())
}

pub fn is_token_like(key: &str) -> bool {
    TOKEN_LIKE.is_match(key)
}

/// Drop cursors, story ids and token-like keys, recursing into nested objects.
pub fn sanitize_variables(variables: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in variables {
        if is_cursor_key(key) || is_story_id_key(key) || is_token_like(key) {
            continue;
        }
        let value = match value {
            Value::Object(inner) => Value::Object(sanitize_variables(inner)),
            other => other.clone(),
        };
        out.insert(key.clone(), value);
    }
    out
}

pub fn is_graphql_identity_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    GRAPHQL_IDENTITY_KEYS.contains(&lower.as_str())
}

/// Keep non-GraphQL request parameters minus the deny-list and empty values.
pub fn sanitize_request_params(params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter(|(key, value)| {
            let lower = key.to_ascii_lowercase();
            !value.trim().is_empty()
                && !is_graphql_identity_key(key)
                && !REQUEST_PARAM_DENY_LIST.contains(&lower.as_str())
                && !is_token_like(key)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_cursors_story_ids_and_tokens() {
        let vars = json!({
            "id": "100012345",
            "count": 3,
            "cursor": "AQHR...",
            "storyID": "S:_I1",
            "scale": 2,
            "fb_dtsg": "tok",
            "nested": {"accessToken": "x", "renderLocation": "timeline"}
        });
        let cleaned = sanitize_variables(vars.as_object().unwrap());
        assert_eq!(
            Value::Object(cleaned),
            json!({
                "id": "100012345",
                "count": 3,
                "scale": 2,
                "nested": {"renderLocation": "timeline"}
            })
        );
    }

    #[test]
    fn request_params_drop_deny_list_identity_and_empty() {
        let mut params = BTreeMap::new();
        for (k, v) in [
            ("fb_dtsg", "secret"),
            ("jazoest", "2123"),
            ("__user", "1000"),
            ("doc_id", "123"),
            ("variables", "{}"),
            ("__crn", "comet.fbweb.CometProfileTimelineListViewRoute"),
            ("__aaid", "0"),
            ("__hsdp", ""),
        ] {
            params.insert(k.to_string(), v.to_string());
        }
        let kept = sanitize_request_params(&params);
        let keys: Vec<&str> = kept.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["__aaid", "__crn"]);
    }
}
