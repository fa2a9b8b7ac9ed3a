use serde_json::{Value, json};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

use crate::harvest::clock::{ClockError, PlaybackClock, parse_clock_label};
use crate::harvest::config::SelectorConfig;
use crate::harvest::message::RawEntry;
use crate::harvest::source::{ContentSource, SourceError};
use crate::webdriver::client::{ErrorKind, FrameFocus, WebDriver, WebDriverError};

/// Reads every visible chat row in one round trip. Fields that are not
/// rendered yet come back as `null`.
const VISIBLE_ENTRIES_SCRIPT: &str = r#"
const [rowSel, authorSel, timestampSel, bodySel] = arguments;
const read = (row, sel) => {
  const el = row.querySelector(sel);
  return el ? el.innerText.trim() : null;
};
return Array.from(document.querySelectorAll(rowSel)).map((row) => ({
  author: read(row, authorSel),
  timestamp: read(row, timestampSel),
  body: read(row, bodySel),
}));
"#;

const LABEL_SCRIPT: &str = r#"
const el = document.querySelector(arguments[0]);
return el ? el.textContent.trim() : null;
"#;

fn clock_error(err: WebDriverError) -> ClockError {
    ClockError::Unavailable(err.to_string())
}

pub fn source_error(err: WebDriverError) -> SourceError {
    match err.kind() {
        ErrorKind::NoSuchElement
        | ErrorKind::StaleElement
        | ErrorKind::NoSuchFrame
        | ErrorKind::NoSuchWindow
        | ErrorKind::InvalidSession => SourceError::ConnectionLost(err.to_string()),
        ErrorKind::ScriptTimeout | ErrorKind::Timeout | ErrorKind::Other => {
            SourceError::Transient(err.to_string())
        }
    }
}

fn decode_entries(value: Value) -> Result<Vec<RawEntry>, SourceError> {
    serde_json::from_value(value)
        .map_err(|err| SourceError::Transient(format!("unexpected chat listing shape: {err}")))
}

/// Player controls in the top-level document.
pub struct WebDriverClock {
    driver: Rc<WebDriver>,
    selectors: SelectorConfig,
}

impl WebDriverClock {
    pub fn new(driver: Rc<WebDriver>, selectors: SelectorConfig) -> Self {
        Self { driver, selectors }
    }

    fn ensure_top(&self) -> Result<(), WebDriverError> {
        if self.driver.focus() != FrameFocus::Top {
            self.driver.switch_to_top()?;
        }
        Ok(())
    }

    fn read_label(&self, selector: &str) -> Result<String, ClockError> {
        self.ensure_top().map_err(clock_error)?;
        let value = self
            .driver
            .execute(LABEL_SCRIPT, vec![json!(selector)])
            .map_err(clock_error)?;
        match value.as_str() {
            Some(label) if !label.is_empty() => Ok(label.to_string()),
            _ => Err(ClockError::Unavailable(format!("`{selector}` has no text"))),
        }
    }
}

impl PlaybackClock for WebDriverClock {
    fn duration(&mut self) -> Result<Duration, ClockError> {
        self.ensure_top().map_err(clock_error)?;
        let element = self
            .driver
            .wait_for(&self.selectors.duration)
            .map_err(clock_error)?;
        // Rendered text is empty while the control bar is hidden.
        let mut label = self.driver.text(&element).map_err(clock_error)?;
        if label.trim().is_empty() {
            label = self.read_label(&self.selectors.duration)?;
        }
        parse_clock_label(&label).map(Duration::from_secs)
    }

    fn start_playback(&mut self) -> Result<(), ClockError> {
        self.ensure_top().map_err(clock_error)?;
        let button = self
            .driver
            .wait_for(&self.selectors.play_button)
            .map_err(clock_error)?;
        self.driver.click(&button).map_err(clock_error)
    }

    fn current_position(&mut self) -> Result<String, ClockError> {
        self.read_label(&self.selectors.current_time)
    }

    fn release(&mut self) {
        self.driver.quit();
    }
}

/// Live chat rendered inside its own iframe.
pub struct WebDriverChat {
    driver: Rc<WebDriver>,
    selectors: SelectorConfig,
    url: String,
}

impl WebDriverChat {
    pub fn new(driver: Rc<WebDriver>, selectors: SelectorConfig, url: impl Into<String>) -> Self {
        Self {
            driver,
            selectors,
            url: url.into(),
        }
    }

    fn enter_chat_frame(&self, wait: bool) -> Result<(), WebDriverError> {
        self.driver.switch_to_top()?;
        let frame = if wait {
            self.driver.wait_for(&self.selectors.chat_frame)?
        } else {
            self.driver.find(&self.selectors.chat_frame)?
        };
        self.driver.switch_to_frame(&frame, FrameFocus::Chat)
    }
}

impl ContentSource for WebDriverChat {
    fn open(&mut self) -> Result<(), SourceError> {
        debug!(url = %self.url, "navigating");
        self.driver
            .navigate(&self.url)
            .map_err(|err| SourceError::Setup(err.to_string()))
    }

    fn attach(&mut self) -> Result<(), SourceError> {
        self.enter_chat_frame(true)
            .map_err(|err| SourceError::Setup(format!("chat frame not found: {err}")))
    }

    fn list_visible_messages(&mut self) -> Result<Vec<RawEntry>, SourceError> {
        if self.driver.focus() != FrameFocus::Chat {
            self.enter_chat_frame(false).map_err(source_error)?;
        }
        let selectors = &self.selectors;
        let value = self
            .driver
            .execute(
                VISIBLE_ENTRIES_SCRIPT,
                vec![
                    json!(selectors.message),
                    json!(selectors.author),
                    json!(selectors.timestamp),
                    json!(selectors.body),
                ],
            )
            .map_err(source_error)?;
        decode_entries(value)
    }

    fn reconnect(&mut self) -> Result<(), SourceError> {
        self.enter_chat_frame(false).map_err(source_error)
    }

    fn release(&mut self) {
        self.driver.quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(code: &str) -> WebDriverError {
        WebDriverError::Protocol {
            code: code.to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn detached_frames_are_connection_losses() {
        for code in ["stale element reference", "no such frame", "invalid session id"] {
            assert!(matches!(
                source_error(protocol(code)),
                SourceError::ConnectionLost(_)
            ));
        }
    }

    #[test]
    fn script_timeouts_are_transient() {
        assert!(matches!(
            source_error(protocol("script timeout")),
            SourceError::Transient(_)
        ));
        assert!(matches!(
            source_error(protocol("javascript error")),
            SourceError::Transient(_)
        ));
    }

    #[test]
    fn partial_rows_decode_with_missing_fields() {
        let value = json!([
            {"author": "ana", "timestamp": "12:01 PM", "body": "হ্যালো"},
            {"author": "bo", "timestamp": null, "body": null}
        ]);
        let entries = decode_entries(value).expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].body.as_deref(), Some("হ্যালো"));
        assert!(entries[1].extract("0:10").is_err());
    }

    #[test]
    fn non_array_listing_is_transient() {
        assert!(matches!(
            decode_entries(json!(null)),
            Err(SourceError::Transient(_))
        ));
    }
}
