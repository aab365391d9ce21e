use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::capture::{ObservedBody, ObservedRequest};
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct Har {
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub version: Option<String>,
    pub creator: Option<Creator>,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Creator {
    pub name: String,
    pub version: String,
}

/// Only the request side matters for calibration; responses are not modelled.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub started_date_time: Option<String>,
    pub request: Request,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub post_data: Option<PostData>,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    pub mime_type: Option<String>,
    pub text: Option<String>,
    pub params: Option<Vec<PostParam>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostParam {
    pub name: String,
    pub value: Option<String>,
}

/// Parse a HAR file from disk into strongly typed structures.
pub fn parse_har_file(path: &Path) -> Result<Har> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let har: Har = serde_json::from_reader(reader)?;
    Ok(har)
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// The request as the capture engine sees it. Post text wins over the
    /// pre-split params browsers sometimes record instead.
    pub fn to_observed(&self) -> ObservedRequest {
        let post = self.post_data.as_ref();
        let content_type = post
            .and_then(|p| p.mime_type.clone())
            .filter(|m| !m.is_empty())
            .or_else(|| self.header("content-type").map(str::to_string));
        let body = post.and_then(|p| match (&p.text, &p.params) {
            (Some(text), _) if !text.is_empty() => Some(ObservedBody::Text(text.clone())),
            (_, Some(params)) if !params.is_empty() => Some(ObservedBody::Fields(
                params
                    .iter()
                    .map(|p| (p.name.clone(), p.value.clone().unwrap_or_default()))
                    .collect(),
            )),
            _ => None,
        });
        ObservedRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            content_type,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_side_of_entries() {
        let json = r#"
        {
          "log": {
            "version": "1.2",
            "entries": [
              {
                "startedDateTime": "2024-01-15T10:30:00.000Z",
                "time": 150.5,
                "request": {
                  "method": "POST",
                  "url": "https://www.facebook.com/api/graphql/",
                  "httpVersion": "HTTP/2",
                  "headers": [{"name": "Content-Type", "value": "application/x-www-form-urlencoded"}],
                  "postData": {
                    "params": [{"name": "doc_id", "value": "1"}, {"name": "av"}]
                  }
                },
                "response": {"status": 200, "content": {"size": 0}}
              }
            ]
          }
        }
        "#;

        let har: Har = serde_json::from_str(json).expect("HAR should parse");
        assert_eq!(har.log.entries.len(), 1);
        let observed = har.log.entries[0].request.to_observed();
        assert_eq!(observed.method, "POST");
        assert_eq!(observed.content_type.as_deref(), Some("application/x-www-form-urlencoded"));
        assert_eq!(
            observed.body,
            Some(ObservedBody::Fields(vec![
                ("doc_id".to_string(), "1".to_string()),
                ("av".to_string(), String::new()),
            ]))
        );
    }
}
