//! Ambient request parameters read from the host page.
//!
//! Session tokens expire during a session, so these are recomputed for every
//! request and never cached. Every read is best effort: a missing or unreadable
//! source contributes nothing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

/// Read-only view of the logged-in page the requests are made on behalf of.
pub trait HostPage {
    fn cookie(&self, name: &str) -> Option<String>;
    fn input_value(&self, name: &str) -> Option<String>;
    fn global(&self, name: &str) -> Option<String>;
    /// Full `Cookie` header for credentialed requests.
    fn cookie_header(&self) -> Option<String>;
    fn page_url(&self) -> Option<String>;
}

/// Captured state of the host page: URL, cookies, form inputs and globals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSnapshot {
    pub url: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub inputs: BTreeMap<String, String>,
    pub globals: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    cookie: Option<String>,
    #[serde(default)]
    cookies: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    inputs: BTreeMap<String, Value>,
    #[serde(default)]
    globals: BTreeMap<String, Value>,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_map(raw: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(k, v)| scalar_text(&v).map(|v| (k, v)))
        .collect()
}

/// Split a `document.cookie` style string into name/value pairs.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

impl HostSnapshot {
    pub fn from_json(text: &str) -> Option<Self> {
        let raw: RawSnapshot = serde_json::from_str(text).ok()?;
        let mut cookies = raw
            .cookie
            .as_deref()
            .map(parse_cookie_header)
            .unwrap_or_default();
        if let Some(map) = raw.cookies {
            cookies.extend(scalar_map(map));
        }
        Some(Self {
            url: raw.url,
            cookies,
            inputs: scalar_map(raw.inputs),
            globals: scalar_map(raw.globals),
        })
    }

    pub fn load(path: &Path) -> Option<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let snapshot = Self::from_json(&text);
                if snapshot.is_none() {
                    tracing::warn!(path = %path.display(), "host snapshot is not valid JSON");
                }
                snapshot
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "host snapshot unreadable");
                None
            }
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

impl HostPage for HostSnapshot {
    fn cookie(&self, name: &str) -> Option<String> {
        non_empty(self.cookies.get(name))
    }

    fn input_value(&self, name: &str) -> Option<String> {
        non_empty(self.inputs.get(name))
    }

    fn global(&self, name: &str) -> Option<String> {
        non_empty(self.globals.get(name))
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let header = self
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    fn page_url(&self) -> Option<String> {
        non_empty(self.url.as_ref())
    }
}

/// Host snapshot backed by a file that is re-read on every access, so tokens
/// refreshed by an external helper are picked up mid-run.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Option<HostSnapshot> {
        HostSnapshot::load(&self.path)
    }
}

impl HostPage for SnapshotFile {
    fn cookie(&self, name: &str) -> Option<String> {
        self.read()?.cookie(name)
    }

    fn input_value(&self, name: &str) -> Option<String> {
        self.read()?.input_value(name)
    }

    fn global(&self, name: &str) -> Option<String> {
        self.read()?.global(name)
    }

    fn cookie_header(&self) -> Option<String> {
        self.read()?.cookie_header()
    }

    fn page_url(&self) -> Option<String> {
        self.read()?.page_url()
    }
}

/// Integrity code sent alongside `fb_dtsg`: `"2"` followed by the sum of the
/// token's character codes.
pub fn jazoest(token: &str) -> String {
    let sum: u64 = token.chars().map(|c| u64::from(u32::from(c))).sum();
    format!("2{sum}")
}

const SPIN_GLOBALS: &[&str] = &["__spin_r", "__spin_b", "__spin_t"];

/// Fresh ambient parameters for one request.
pub fn compute_ambient_params(host: &dyn HostPage) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for (key, value) in [
        ("__a", "1"),
        ("__comet_req", "15"),
        ("fb_api_caller_class", "RelayModern"),
        ("server_timestamps", "true"),
    ] {
        params.insert(key.to_string(), value.to_string());
    }

    if let Some(user) = host.cookie("c_user") {
        params.insert("__user".to_string(), user.clone());
        params.insert("av".to_string(), user);
    }
    if let Some(token) = host.input_value("fb_dtsg") {
        params.insert("jazoest".to_string(), jazoest(&token));
        params.insert("fb_dtsg".to_string(), token);
    }
    if let Some(lsd) = host.input_value("lsd") {
        params.insert("lsd".to_string(), lsd);
    }
    for name in SPIN_GLOBALS {
        if let Some(value) = host.global(name) {
            params.insert((*name).to_string(), value);
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn jazoest_is_positional_sum() {
        assert_eq!(jazoest("abc"), "2294");
        assert_eq!(jazoest(""), "20");
    }

    #[test]
    fn snapshot_accepts_cookie_string_and_map() {
        let snap = HostSnapshot::from_json(
            r#"{"url":"https://www.facebook.com/me","cookie":"c_user=1000; xs=abc",
                "cookies":{"datr":"zz"},"inputs":{"fb_dtsg":"tok"},"globals":{"__spin_r":1012345}}"#,
        )
        .unwrap();
        assert_eq!(snap.cookie("c_user").as_deref(), Some("1000"));
        assert_eq!(snap.cookie("datr").as_deref(), Some("zz"));
        assert_eq!(snap.global("__spin_r").as_deref(), Some("1012345"));
        assert_eq!(snap.cookie_header().as_deref(), Some("c_user=1000; datr=zz; xs=abc"));
    }

    #[test]
    fn ambient_params_come_from_host_page() {
        let mut snap = HostSnapshot::default();
        snap.cookies.insert("c_user".into(), "1000".into());
        snap.inputs.insert("fb_dtsg".into(), "abc".into());
        snap.inputs.insert("lsd".into(), "L1".into());
        snap.globals.insert("__spin_t".into(), "1700000000".into());

        let params = compute_ambient_params(&snap);
        assert_eq!(params["__a"], "1");
        assert_eq!(params["__user"], "1000");
        assert_eq!(params["av"], "1000");
        assert_eq!(params["fb_dtsg"], "abc");
        assert_eq!(params["jazoest"], "2294");
        assert_eq!(params["lsd"], "L1");
        assert_eq!(params["__spin_t"], "1700000000");
        assert!(!params.contains_key("__spin_r"));
    }

    #[test]
    fn missing_sources_contribute_nothing() {
        let params = compute_ambient_params(&SnapshotFile::new("/nonexistent/host.json"));
        assert_eq!(params.len(), 4);
        assert!(!params.contains_key("fb_dtsg"));
    }

    #[test]
    fn snapshot_file_is_reread_on_each_call() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("host.json");
        let page = SnapshotFile::new(&path);

        std::fs::write(&path, r#"{"inputs":{"fb_dtsg":"first"}}"#).unwrap();
        assert_eq!(compute_ambient_params(&page)["fb_dtsg"], "first");

        std::fs::write(&path, r#"{"inputs":{"fb_dtsg":"second"}}"#).unwrap();
        assert_eq!(compute_ambient_params(&page)["fb_dtsg"], "second");
    }
}
