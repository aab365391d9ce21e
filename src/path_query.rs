//! Declarative lookups into untyped JSON.
//!
//! Paths use dot-separated keys with bracketed array indexes, e.g.
//! `data.node.timeline_list_feed_units.edges[0].node`. Response shapes from the
//! timeline endpoint drift between deployments, so callers keep an ordered list
//! of known paths per field and take the first non-null match.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Split a path string into segments. Malformed bracket contents are kept as keys.
pub fn parse_path(path: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        while !rest.is_empty() {
            match rest.find('[') {
                Some(0) => {
                    let Some(end) = rest.find(']') else {
                        out.push(Segment::Key(rest.to_string()));
                        break;
                    };
                    let inner = &rest[1..end];
                    match inner.trim().parse::<usize>() {
                        Ok(idx) => out.push(Segment::Index(idx)),
                        Err(_) => out.push(Segment::Key(inner.to_string())),
                    }
                    rest = &rest[end + 1..];
                }
                Some(pos) => {
                    out.push(Segment::Key(rest[..pos].to_string()));
                    rest = &rest[pos..];
                }
                None => {
                    out.push(Segment::Key(rest.to_string()));
                    break;
                }
            }
        }
    }
    out
}

/// Resolve `path` against `value`. Returns `None` for missing keys, out-of-range
/// indexes, type mismatches, and explicit JSON nulls.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in parse_path(path) {
        current = match (&segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// First non-null match across `paths`, in order.
pub fn first_match<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| get_path(value, path))
}

/// First match that is a non-empty string after trimming.
pub fn first_string<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a str> {
    paths.iter().find_map(|path| {
        get_path(value, path)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    })
}

/// Render a scalar as an identifier string: non-empty strings as-is, integers in
/// decimal. Anything else is not an identifier.
pub fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(|f| f.to_string())
            }
        }
        _ => None,
    }
}

/// Coerce numbers and numeric-looking strings to whole epoch seconds.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_keys_and_indexes() {
        assert_eq!(
            parse_path("a.b[2].c"),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
            ]
        );
        assert_eq!(
            parse_path("actors[0][1]"),
            vec![
                Segment::Key("actors".into()),
                Segment::Index(0),
                Segment::Index(1)
            ]
        );
    }

    #[test]
    fn resolves_nested_values_and_skips_nulls() {
        let value = json!({"a": {"b": [{"c": 1}, {"c": null}]}});
        assert_eq!(get_path(&value, "a.b[0].c"), Some(&json!(1)));
        assert_eq!(get_path(&value, "a.b[1].c"), None);
        assert_eq!(get_path(&value, "a.b[5].c"), None);
        assert_eq!(get_path(&value, "a.b.c"), None);
    }

    #[test]
    fn first_match_uses_declared_order() {
        let value = json!({"message": {"text": "second"}, "story": {"message": {"text": "first"}}});
        let found = first_string(&value, &["missing.text", "story.message.text", "message.text"]);
        assert_eq!(found, Some("first"));
    }

    #[test]
    fn coerces_numeric_strings() {
        assert_eq!(coerce_i64(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(coerce_i64(&json!(1700000000.7)), Some(1_700_000_000));
        assert_eq!(coerce_i64(&json!("soon")), None);
        assert_eq!(scalar_id(&json!(42)), Some("42".to_string()));
        assert_eq!(scalar_id(&json!("  ")), None);
    }
}
