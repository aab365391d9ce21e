use std::collections::HashMap;
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};
use url::Url;

use crate::capture::{CalibrationWait, CaptureManager, ObservedBody, ObservedRequest};
use crate::client::AbortSignal;
use crate::error::{AmpooseError, Result};

use super::calibrate::{persist_capture, print_report};
use super::util::{install_ctrlc, open_store};

/// Messages drained from the socket per poll, so a chatty page cannot starve
/// the readiness check.
const MAX_MESSAGES_PER_TICK: usize = 500;

const SCROLL_SCRIPT: &str = "window.scrollBy(0, Math.max(window.innerHeight, 800));";

/// Options for calibrating against a live Chrome tab via CDP.
pub struct CdpOptions {
    pub store_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub target: Option<String>,
    /// Opened in the tab before capture; the tab's current page is used otherwise.
    pub profile_url: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub scroll_interval: Duration,
}

#[derive(Deserialize)]
struct TargetInfo {
    id: String,
    #[serde(rename = "type")]
    target_type: Option<String>,
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: Option<String>,
}

#[derive(Deserialize)]
struct RequestWillBeSent {
    #[serde(rename = "requestId")]
    request_id: String,
    request: CdpRequest,
}

#[derive(Deserialize)]
struct CdpRequest {
    url: String,
    method: String,
    #[serde(default)]
    headers: serde_json::Map<String, Value>,
    #[serde(rename = "postData")]
    post_data: Option<String>,
    #[serde(rename = "hasPostData", default)]
    has_post_data: bool,
}

impl CdpRequest {
    fn content_type(&self) -> Option<String> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, value)| value.as_str())
            .map(str::to_string)
    }

    fn to_observed(&self) -> ObservedRequest {
        ObservedRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            content_type: self.content_type(),
            body: self
                .post_data
                .clone()
                .filter(|text| !text.is_empty())
                .map(ObservedBody::Text),
        }
    }

    /// Chrome omits large bodies from the event; they must be fetched separately.
    fn body_pending(&self) -> bool {
        self.has_post_data && self.post_data.is_none()
    }
}

/// Decode a CDP frame. Control frames and unreadable payloads yield `None`.
fn frame_json(msg: Message) -> Option<Value> {
    let text = match msg {
        Message::Text(value) => value,
        Message::Binary(value) => match String::from_utf8(value) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(%err, "skipping non-UTF-8 CDP frame");
                return None;
            }
        },
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => return None,
    };
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(%err, "skipping non-JSON CDP frame");
            None
        }
    }
}

struct CdpSession {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    /// Command id of each `Network.getRequestPostData` call, with the request
    /// waiting for its body.
    pending_bodies: HashMap<u64, ObservedRequest>,
}

impl CdpSession {
    fn connect(ws_url: &str) -> Result<Self> {
        let (mut socket, _) = connect(Url::parse(ws_url)?)
            .map_err(|err| AmpooseError::InvalidArgs(format!("Failed to connect to CDP: {err}")))?;
        if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream.set_read_timeout(Some(Duration::from_millis(50)))?;
        }
        Ok(Self {
            socket,
            next_id: 1,
            pending_bodies: HashMap::new(),
        })
    }

    fn send(&mut self, method: &str, params: Value) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        let payload = json!({ "id": id, "method": method, "params": params });
        self.socket
            .send(Message::Text(payload.to_string()))
            .map_err(|err| AmpooseError::InvalidArgs(format!("CDP send error: {err}")))?;
        Ok(id)
    }

    /// Drain whatever the browser has sent so far.
    fn pump(&mut self, manager: &CaptureManager) -> Result<()> {
        for _ in 0..MAX_MESSAGES_PER_TICK {
            match self.socket.read() {
                Ok(msg) => self.handle_message(manager, msg)?,
                Err(tungstenite::Error::Io(err))
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(())
                }
                Err(err) => {
                    return Err(AmpooseError::InvalidArgs(format!("CDP socket error: {err}")))
                }
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, manager: &CaptureManager, msg: Message) -> Result<()> {
        let Some(value) = frame_json(msg) else {
            return Ok(());
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            if let Some(mut request) = self.pending_bodies.remove(&id) {
                request.body = value
                    .pointer("/result/postData")
                    .and_then(Value::as_str)
                    .map(|text| ObservedBody::Text(text.to_string()));
                manager.observe(&request);
            }
            return Ok(());
        }

        if value.get("method").and_then(Value::as_str) != Some("Network.requestWillBeSent") {
            return Ok(());
        }
        let Some(params) = value.get("params") else {
            return Ok(());
        };
        let event: RequestWillBeSent = match serde_json::from_value(params.clone()) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(%err, "skipping unreadable requestWillBeSent");
                return Ok(());
            }
        };
        let observed = event.request.to_observed();
        if event.request.body_pending() && crate::capture::is_graphql_url(&observed.url) {
            let id = self.send(
                "Network.getRequestPostData",
                json!({ "requestId": event.request_id }),
            )?;
            self.pending_bodies.insert(id, observed);
        } else {
            manager.observe(&observed);
        }
        Ok(())
    }
}

/// Calibrate by watching a live tab until the required operations are seen.
pub fn run_cdp_calibration(options: &CdpOptions) -> Result<()> {
    let base_url = format!("http://{}:{}", options.host, options.port);
    let target = select_target(&base_url, options.target.as_deref())?;
    let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
        AmpooseError::InvalidArgs("Selected target is missing webSocketDebuggerUrl".to_string())
    })?;

    println!(
        "Connecting to Chrome target {} ({})...",
        target.id,
        target.url.as_deref().unwrap_or("unknown target url")
    );
    let mut session = CdpSession::connect(&ws_url)?;

    let abort = AbortSignal::new();
    let abort_handler = abort.clone();
    install_ctrlc(move || abort_handler.abort())?;

    let manager = CaptureManager::new();
    manager.start();
    let Some(automation) = manager.begin_automation() else {
        println!("Calibration already running; capture re-enabled");
        return Ok(());
    };

    session.send("Network.enable", json!({}))?;
    session.send("Page.enable", json!({}))?;
    if let Some(url) = &options.profile_url {
        println!("Opening {url}");
        session.send("Page.navigate", json!({ "url": url }))?;
    }

    println!(
        "Waiting up to {}s for the profile timeline query (scroll the profile, Ctrl+C to stop)...",
        options.timeout.as_secs()
    );

    let mut failure: Option<AmpooseError> = None;
    let mut last_scroll = Instant::now();
    let outcome = manager.wait_for_required(options.timeout, options.poll_interval, &abort, || {
        if failure.is_some() {
            return;
        }
        let mut step = || -> Result<()> {
            session.pump(&manager)?;
            if last_scroll.elapsed() >= options.scroll_interval {
                session.send("Runtime.evaluate", json!({ "expression": SCROLL_SCRIPT }))?;
                last_scroll = Instant::now();
            }
            Ok(())
        };
        if let Err(err) = step() {
            failure = Some(err);
            abort.abort();
        }
    });
    drop(automation);
    manager.stop();

    match &outcome {
        CalibrationWait::Ready => println!("Required operations captured"),
        CalibrationWait::TimedOut { .. } => println!(
            "Timed out after {}s; saving what was captured",
            options.timeout.as_secs()
        ),
        CalibrationWait::Aborted { .. } => println!("Interrupted; saving what was captured"),
    }

    let store = open_store(&options.store_path)?;
    let report = persist_capture(&manager, store.as_ref())?;
    print_report(&report, &options.store_path);

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn select_target(base_url: &str, target_hint: Option<&str>) -> Result<TargetInfo> {
    let url = format!("{base_url}/json/list");
    let response = ureq::get(&url)
        .call()
        .map_err(|err| AmpooseError::InvalidArgs(format!("Failed to fetch {url}: {err}")))?;
    let targets: Vec<TargetInfo> = response
        .into_json()
        .map_err(|err| AmpooseError::InvalidArgs(format!("Invalid CDP target JSON: {err}")))?;
    choose_target(targets, target_hint)
}

fn choose_target(targets: Vec<TargetInfo>, target_hint: Option<&str>) -> Result<TargetInfo> {
    let mut candidates: Vec<TargetInfo> = targets
        .into_iter()
        .filter(|t| t.target_type.as_deref() == Some("page"))
        .collect();

    if let Some(hint) = target_hint {
        let hint_lower = hint.to_lowercase();
        let contains = |field: Option<&str>| {
            field
                .map(|value| value.to_lowercase().contains(&hint_lower))
                .unwrap_or(false)
        };
        candidates.retain(|t| {
            t.id.eq_ignore_ascii_case(hint)
                || contains(t.url.as_deref())
                || contains(t.title.as_deref())
        });
    } else if candidates.len() > 1 {
        // Without a hint, a single facebook tab is the obvious choice.
        let facebook: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, t)| t.url.as_deref().is_some_and(|u| u.contains("facebook.com")))
            .map(|(i, _)| i)
            .collect();
        if let [only] = facebook.as_slice() {
            return Ok(candidates.swap_remove(*only));
        }
    }

    match candidates.len() {
        0 => Err(AmpooseError::InvalidArgs(
            "No matching Chrome targets found".to_string(),
        )),
        1 => Ok(candidates.remove(0)),
        _ => Err(AmpooseError::InvalidArgs(
            "Multiple Chrome targets matched; use --target to disambiguate".to_string(),
        )),
    }
}
