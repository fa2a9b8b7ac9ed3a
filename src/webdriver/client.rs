use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::harvest::config::WebDriverConfig;
use crate::webdriver::driver::DriverProcess;

/// W3C key under which element references are returned.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum WebDriverError {
    #[error("webdriver request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webdriver error `{code}`: {message}")]
    Protocol { code: String, message: String },
    #[error("malformed webdriver response: {0}")]
    Malformed(String),
    #[error("timed out after {secs}s waiting for `{selector}`")]
    WaitTimeout { selector: String, secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoSuchElement,
    StaleElement,
    NoSuchFrame,
    NoSuchWindow,
    InvalidSession,
    ScriptTimeout,
    Timeout,
    Other,
}

impl WebDriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol { code, .. } => match code.as_str() {
                "no such element" => ErrorKind::NoSuchElement,
                "stale element reference" => ErrorKind::StaleElement,
                "no such frame" => ErrorKind::NoSuchFrame,
                "no such window" => ErrorKind::NoSuchWindow,
                "invalid session id" => ErrorKind::InvalidSession,
                "script timeout" => ErrorKind::ScriptTimeout,
                "timeout" => ErrorKind::Timeout,
                _ => ErrorKind::Other,
            },
            Self::Transport(err) if err.is_timeout() => ErrorKind::Timeout,
            Self::WaitTimeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

impl ElementRef {
    fn to_json(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

/// Which browsing context commands currently run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFocus {
    Top,
    Chat,
}

pub fn capabilities(cfg: &WebDriverConfig) -> Value {
    let mut args = vec!["--log-level=3".to_string()];
    if cfg.mute_audio {
        args.push("--mute-audio".to_string());
    }
    if cfg.headless {
        args.push("--headless=new".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-logging"],
                }
            }
        }
    })
}

/// Pulls `value` out of a response body, turning W3C error payloads into
/// [`WebDriverError::Protocol`].
pub fn unwrap_value(body: Value) -> Result<Value, WebDriverError> {
    let Value::Object(mut map) = body else {
        return Err(WebDriverError::Malformed("response is not an object".into()));
    };
    let value = map.remove("value").unwrap_or(Value::Null);
    if let Some(code) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(WebDriverError::Protocol {
            code: code.to_string(),
            message,
        });
    }
    Ok(value)
}

fn element_from(value: &Value) -> Result<ElementRef, WebDriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| WebDriverError::Malformed(format!("expected element reference, got {value}")))
}

/// One browser session. Shared by the clock and chat adapters, so every
/// command takes `&self`.
#[derive(Debug)]
pub struct WebDriver {
    http: Client,
    base: String,
    session_id: String,
    wait_timeout: Duration,
    focus: Cell<FrameFocus>,
    closed: Cell<bool>,
    service: RefCell<Option<DriverProcess>>,
}

impl WebDriver {
    pub fn connect(base_url: &str, cfg: &WebDriverConfig) -> Result<Self, WebDriverError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        let base = base_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{base}/session"))
            .json(&capabilities(cfg))
            .send()?;
        let value = unwrap_value(response.json()?)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Malformed("new session without sessionId".into()))?
            .to_string();
        debug!(session_id = %session_id, "webdriver session created");

        Ok(Self {
            http,
            base,
            session_id,
            wait_timeout: Duration::from_secs(cfg.wait_timeout_secs),
            focus: Cell::new(FrameFocus::Top),
            closed: Cell::new(false),
            service: RefCell::new(None),
        })
    }

    /// Ties a spawned driver process to this session; it is stopped on quit.
    pub fn with_service(self, process: Option<DriverProcess>) -> Self {
        *self.service.borrow_mut() = process;
        self
    }

    fn command(&self, method: Method, path: &str, body: Value) -> Result<Value, WebDriverError> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        let request = self.http.request(method.clone(), &url);
        let request = if method == Method::GET || method == Method::DELETE {
            request
        } else {
            request.json(&body)
        };
        let response = request.send()?;
        unwrap_value(response.json()?)
    }

    pub fn focus(&self) -> FrameFocus {
        self.focus.get()
    }

    pub fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/url", json!({ "url": url }))?;
        self.focus.set(FrameFocus::Top);
        Ok(())
    }

    pub fn find(&self, selector: &str) -> Result<ElementRef, WebDriverError> {
        let value = self.command(
            Method::POST,
            "/element",
            json!({ "using": "css selector", "value": selector }),
        )?;
        element_from(&value)
    }

    /// Polls [`WebDriver::find`] until the element exists or the wait
    /// timeout passes.
    pub fn wait_for(&self, selector: &str) -> Result<ElementRef, WebDriverError> {
        let started = Instant::now();
        loop {
            match self.find(selector) {
                Ok(element) => return Ok(element),
                Err(err) if err.kind() == ErrorKind::NoSuchElement => {
                    if started.elapsed() >= self.wait_timeout {
                        return Err(WebDriverError::WaitTimeout {
                            selector: selector.to_string(),
                            secs: self.wait_timeout.as_secs(),
                        });
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn text(&self, element: &ElementRef) -> Result<String, WebDriverError> {
        let value = self.command(Method::GET, &format!("/element/{}/text", element.0), Value::Null)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub fn click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.command(Method::POST, &format!("/element/{}/click", element.0), json!({}))?;
        Ok(())
    }

    pub fn switch_to_frame(&self, frame: &ElementRef, focus: FrameFocus) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/frame", json!({ "id": frame.to_json() }))?;
        self.focus.set(focus);
        Ok(())
    }

    pub fn switch_to_top(&self) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/frame", json!({ "id": Value::Null }))?;
        self.focus.set(FrameFocus::Top);
        Ok(())
    }

    pub fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, WebDriverError> {
        self.command(
            Method::POST,
            "/execute/sync",
            json!({ "script": script, "args": args }),
        )
    }

    /// Ends the session and stops the driver process. Safe to call twice.
    pub fn quit(&self) {
        if self.closed.replace(true) {
            return;
        }
        if let Err(err) = self.command(Method::DELETE, "", Value::Null) {
            warn!("failed to close webdriver session: {err}");
        }
        if let Some(mut process) = self.service.borrow_mut().take() {
            process.stop();
        }
    }
}

impl Drop for WebDriver {
    fn drop(&mut self) {
        self.quit();
    }
}
