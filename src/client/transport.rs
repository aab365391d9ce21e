use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AmpooseError, Result};

use super::ambient::HostPage;

/// Cooperative cancellation flag shared between a run and whoever stops it.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(AmpooseError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early when aborted. Returns `false` on abort.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_aborted() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Send the host page's cookies along with the request.
    pub include_credentials: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport {
    fn fetch(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<FetchResponse>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn fetch(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<FetchResponse> {
        (**self).fetch(request, abort)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn fetch(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<FetchResponse> {
        (**self).fetch(request, abort)
    }
}

/// Blocking HTTP transport. The in-flight call cannot be interrupted; an abort
/// raised while it runs is reported as soon as it returns.
pub struct UreqTransport {
    agent: ureq::Agent,
    host: Option<Arc<dyn HostPage>>,
}

impl UreqTransport {
    pub fn new(timeout: Option<Duration>, user_agent: Option<&str>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout_connect(timeout).timeout_read(timeout);
        }
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua);
        }
        Self {
            agent: builder.build(),
            host: None,
        }
    }

    /// Source of the cookie header attached to credentialed requests.
    pub fn with_host(mut self, host: Arc<dyn HostPage>) -> Self {
        self.host = Some(host);
        self
    }
}

impl Transport for UreqTransport {
    fn fetch(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<FetchResponse> {
        abort.check()?;

        let mut call = self.agent.request(&request.method, &request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        if request.include_credentials {
            if let Some(cookie) = self.host.as_ref().and_then(|h| h.cookie_header()) {
                call = call.set("cookie", &cookie);
            }
        }

        let response = match &request.body {
            Some(body) => call.send_string(body),
            None => call.call(),
        };
        let response = match response {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(err)) => {
                abort.check()?;
                return Err(AmpooseError::Transport(err.to_string()));
            }
        };
        abort.check()?;

        let status = response.status();
        let mut body = String::new();
        response.into_reader().read_to_string(&mut body)?;
        Ok(FetchResponse { status, body })
    }
}
