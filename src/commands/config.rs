use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::harvest::config::{HarvestConfig, resolve_config_path};

include!(concat!(env!("OUT_DIR"), "/harvest_env_allowlist.rs"));

fn unknown_harvest_vars(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("HARVEST_"))
        .filter(|key| !GENERATED_HARVEST_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

pub fn run(cfg: &HarvestConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("config");

    match resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config_file={}", path.display())),
        Some(path) => report.detail(format!("config_file={} (not found)", path.display())),
        None => report.detail("config_file=none"),
    }

    let h = &cfg.harvest;
    report.detail(format!("harvest.batch_size={}", h.batch_size));
    report.detail(format!("harvest.poll_interval_ms={}", h.poll_interval_ms));
    report.detail(format!("harvest.progress_every_secs={}", h.progress_every_secs));
    report.detail(format!("harvest.default_duration_secs={}", h.default_duration_secs));
    report.detail(format!("harvest.settle_secs={}", h.settle_secs));
    report.detail(format!("harvest.echo_messages={}", h.echo_messages));

    let w = &cfg.webdriver;
    report.detail(format!(
        "webdriver.url={}",
        w.url.as_deref().unwrap_or("(spawn local driver)")
    ));
    report.detail(format!(
        "webdriver.driver_bin={}",
        w.driver_bin.as_deref().unwrap_or("chromedriver")
    ));
    report.detail(format!("webdriver.driver_port={}", w.driver_port));
    report.detail(format!("webdriver.headless={}", w.headless));
    report.detail(format!("webdriver.mute_audio={}", w.mute_audio));
    report.detail(format!("webdriver.request_timeout_secs={}", w.request_timeout_secs));
    report.detail(format!("webdriver.wait_timeout_secs={}", w.wait_timeout_secs));

    for (name, selector) in cfg.selectors.entries() {
        report.detail(format!("selectors.{name}={selector}"));
    }

    report.detail(format!("logging.file={}", cfg.logging.file));
    report.detail(format!("logging.filter={}", cfg.logging.filter));

    for key in unknown_harvest_vars(env::vars().map(|(key, _)| key)) {
        report.issue(format!("unknown environment variable {key}"));
    }

    Ok(report)
}
