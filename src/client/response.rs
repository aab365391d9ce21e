use serde_json::Value;

use crate::error::{AmpooseError, Result};

/// Anti-hijacking prefixes some GraphQL servers put in front of JSON bodies.
const HIJACK_PREFIXES: &[&str] = &["for (;;);", "for(;;);", "while(1);", "while (1);", ")]}'"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// One payload, preferring one that carries `data` or `errors`.
    #[default]
    Single,
    /// Every payload, in arrival order.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphqlPayload {
    Single(Value),
    All(Vec<Value>),
}

impl GraphqlPayload {
    /// Payloads as a list regardless of mode.
    pub fn fragments(&self) -> Vec<&Value> {
        match self {
            GraphqlPayload::Single(value) => vec![value],
            GraphqlPayload::All(values) => values.iter().collect(),
        }
    }

    pub fn into_fragments(self) -> Vec<Value> {
        match self {
            GraphqlPayload::Single(value) => vec![value],
            GraphqlPayload::All(values) => values,
        }
    }
}

fn strip_prefix(body: &str) -> &str {
    let trimmed = body.trim_start();
    for prefix in HIJACK_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim_start();
        }
    }
    trimmed
}

fn has_data_or_errors(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("data") || o.contains_key("errors"))
}

/// Parse a GraphQL response body. Handles prefixed bodies and newline-delimited
/// streams; an empty body is reported separately from a malformed one.
pub fn parse_graphql_body(body: &str, mode: ResponseMode) -> Result<GraphqlPayload> {
    let text = strip_prefix(body).trim();
    if text.is_empty() {
        return Err(AmpooseError::EmptyResponse);
    }

    let payloads = match serde_json::from_str::<Value>(text) {
        Ok(value) => vec![value],
        Err(whole_err) => {
            let mut values = Vec::new();
            for (idx, line) in text.lines().enumerate() {
                let line = strip_prefix(line).trim();
                if line.is_empty() {
                    continue;
                }
                let value = serde_json::from_str::<Value>(line).map_err(|err| {
                    AmpooseError::MalformedResponse(format!(
                        "line {}: {err} (whole body: {whole_err})",
                        idx + 1
                    ))
                })?;
                values.push(value);
            }
            if values.is_empty() {
                return Err(AmpooseError::MalformedResponse(whole_err.to_string()));
            }
            values
        }
    };

    match mode {
        ResponseMode::All => Ok(GraphqlPayload::All(payloads)),
        ResponseMode::Single => {
            let preferred = payloads.iter().position(has_data_or_errors).unwrap_or(0);
            let value = payloads
                .into_iter()
                .nth(preferred)
                .ok_or(AmpooseError::EmptyResponse)?;
            Ok(GraphqlPayload::Single(value))
        }
    }
}
