use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarvestError;
use crate::harvest::batch::DEFAULT_BATCH_SIZE;
use crate::harvest::clock::DEFAULT_DURATION_SECS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestLoopConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub progress_every_secs: u64,
    pub default_duration_secs: u64,
    pub settle_secs: u64,
    pub echo_messages: bool,
}

impl Default for HarvestLoopConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: 1_000,
            progress_every_secs: 30,
            default_duration_secs: DEFAULT_DURATION_SECS,
            settle_secs: 5,
            echo_messages: true,
        }
    }
}

impl HarvestLoopConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.default_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Existing WebDriver endpoint. When unset a local driver is spawned.
    pub url: Option<String>,
    pub driver_bin: Option<String>,
    pub driver_port: u16,
    pub headless: bool,
    pub mute_audio: bool,
    pub request_timeout_secs: u64,
    pub wait_timeout_secs: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: None,
            driver_bin: None,
            driver_port: 9515,
            headless: false,
            mute_audio: true,
            request_timeout_secs: 20,
            wait_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub duration: String,
    pub current_time: String,
    pub play_button: String,
    pub chat_frame: String,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    pub body: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            duration: "span.ytp-time-duration".to_string(),
            current_time: "span.ytp-time-current".to_string(),
            play_button: "button.ytp-play-button".to_string(),
            chat_frame: "iframe#chatframe".to_string(),
            message: "yt-live-chat-text-message-renderer".to_string(),
            author: "#author-name".to_string(),
            timestamp: "#timestamp".to_string(),
            body: "#message".to_string(),
        }
    }
}

impl SelectorConfig {
    pub fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("duration", &self.duration),
            ("current_time", &self.current_time),
            ("play_button", &self.play_button),
            ("chat_frame", &self.chat_frame),
            ("message", &self.message),
            ("author", &self.author),
            ("timestamp", &self.timestamp),
            ("body", &self.body),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: String,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: "chat-harvest.log".to_string(),
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarvestConfig {
    pub harvest: HarvestLoopConfig,
    pub webdriver: WebDriverConfig,
    pub selectors: SelectorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHarvestConfig {
    harvest: Option<HarvestLoopConfig>,
    webdriver: Option<WebDriverConfig>,
    selectors: Option<SelectorConfig>,
    logging: Option<LoggingConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u16(var: &str, fallback: u16) -> u16 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u16>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

pub fn validate(cfg: &HarvestConfig) -> Result<()> {
    if cfg.harvest.batch_size == 0 {
        return Err(anyhow!("invalid batch size: must be >= 1"));
    }
    if cfg.harvest.poll_interval_ms == 0 {
        return Err(anyhow!("invalid poll interval: must be >= 1 ms"));
    }
    if cfg.harvest.progress_every_secs == 0 {
        return Err(anyhow!("invalid progress cadence: must be >= 1 second"));
    }
    if cfg.harvest.default_duration_secs == 0 {
        return Err(anyhow!("invalid default duration: must be >= 1 second"));
    }
    if cfg.webdriver.request_timeout_secs == 0 || cfg.webdriver.wait_timeout_secs == 0 {
        return Err(anyhow!("invalid webdriver timeouts: must be >= 1 second"));
    }
    if let Some(url) = &cfg.webdriver.url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        return Err(anyhow!("invalid webdriver url `{url}`: expected http(s)://"));
    }
    for (name, selector) in cfg.selectors.entries() {
        if selector.trim().is_empty() {
            return Err(anyhow!("invalid selector `{name}`: cannot be empty"));
        }
    }
    if cfg.logging.file.trim().is_empty() {
        return Err(anyhow!("invalid log file: cannot be empty"));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("HARVEST_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("chat-harvest").join("config.toml"))
}

fn merge_toml(base: &mut HarvestConfig, raw: &str) -> Result<()> {
    let parsed: PartialHarvestConfig = toml::from_str(raw)?;
    if let Some(harvest) = parsed.harvest {
        base.harvest = harvest;
    }
    if let Some(webdriver) = parsed.webdriver {
        base.webdriver = webdriver;
    }
    if let Some(selectors) = parsed.selectors {
        base.selectors = selectors;
    }
    if let Some(logging) = parsed.logging {
        base.logging = logging;
    }
    Ok(())
}

fn merge_file_config(base: &mut HarvestConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse harvest config {}: {err}", path.display()))
}

fn apply_env_overrides(cfg: &mut HarvestConfig) {
    let h = &mut cfg.harvest;
    h.batch_size = env_or_usize("HARVEST_BATCH_SIZE", h.batch_size);
    h.poll_interval_ms = env_or_u64("HARVEST_POLL_INTERVAL_MS", h.poll_interval_ms);
    h.progress_every_secs = env_or_u64("HARVEST_PROGRESS_EVERY_SECS", h.progress_every_secs);
    h.default_duration_secs =
        env_or_u64("HARVEST_DEFAULT_DURATION_SECS", h.default_duration_secs);
    h.settle_secs = env_or_u64("HARVEST_SETTLE_SECS", h.settle_secs);
    h.echo_messages = env_or_bool("HARVEST_ECHO_MESSAGES", h.echo_messages);

    let w = &mut cfg.webdriver;
    w.url = env_or_optional("HARVEST_WEBDRIVER_URL", w.url.take());
    w.driver_bin = env_or_optional("HARVEST_DRIVER_BIN", w.driver_bin.take());
    w.driver_port = env_or_u16("HARVEST_DRIVER_PORT", w.driver_port);
    w.headless = env_or_bool("HARVEST_HEADLESS", w.headless);
    w.mute_audio = env_or_bool("HARVEST_MUTE_AUDIO", w.mute_audio);
    w.request_timeout_secs = env_or_u64("HARVEST_REQUEST_TIMEOUT_SECS", w.request_timeout_secs);
    w.wait_timeout_secs = env_or_u64("HARVEST_WAIT_TIMEOUT_SECS", w.wait_timeout_secs);

    cfg.logging.file = env_or_string("HARVEST_LOG_FILE", &cfg.logging.file);
    cfg.logging.filter = env_or_string("HARVEST_LOG_FILTER", &cfg.logging.filter);
}

pub fn load_config() -> Result<HarvestConfig> {
    let mut cfg = HarvestConfig::default();
    merge_file_config(&mut cfg).map_err(|err| HarvestError::InvalidConfig(format!("{err:#}")))?;
    apply_env_overrides(&mut cfg);
    validate(&cfg).map_err(|err| HarvestError::InvalidConfig(err.to_string()))?;
    Ok(cfg)
}
