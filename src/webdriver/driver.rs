use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::harvest::config::WebDriverConfig;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn resolve_driver_bin(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(bin) = configured {
        let path = Path::new(bin);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return which::which(bin)
            .with_context(|| format!("driver binary `{bin}` not found (HARVEST_DRIVER_BIN)"));
    }
    which::which("chromedriver").context("chromedriver not found in HARVEST_DRIVER_BIN or PATH")
}

/// A `chromedriver` started by this process. Stopped on [`DriverProcess::stop`]
/// or drop.
#[derive(Debug)]
pub struct DriverProcess {
    child: Option<Child>,
    url: String,
}

impl DriverProcess {
    pub fn spawn(cfg: &WebDriverConfig) -> Result<Self> {
        let bin = resolve_driver_bin(cfg.driver_bin.as_deref())?;
        let child = Command::new(&bin)
            .arg(format!("--port={}", cfg.driver_port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", bin.display()))?;
        info!(pid = child.id(), "started {}", bin.display());

        let mut process = Self {
            child: Some(child),
            url: format!("http://127.0.0.1:{}", cfg.driver_port),
        };
        process.wait_ready(Duration::from_secs(cfg.wait_timeout_secs))?;
        Ok(process)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let http = Client::builder()
            .timeout(READY_POLL_INTERVAL.max(Duration::from_secs(1)))
            .build()?;
        let started = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut()
                && let Some(status) = child.try_wait()?
            {
                anyhow::bail!("driver exited during startup with {status}");
            }
            let ready = http
                .get(format!("{}/status", self.url))
                .send()
                .ok()
                .and_then(|response| response.json::<Value>().ok())
                .and_then(|body| body["value"]["ready"].as_bool())
                .unwrap_or(false);
            if ready {
                debug!(url = %self.url, "driver ready");
                return Ok(());
            }
            if started.elapsed() >= timeout {
                self.stop();
                anyhow::bail!("driver not ready after {}s", timeout.as_secs());
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
    }

    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(err) = child.kill() {
            warn!("failed to stop driver process {}: {err}", child.id());
        }
        let _ = child.wait();
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_configured_binary_is_reported() {
        let err = resolve_driver_bin(Some("/nonexistent/chat-harvest-driver")).expect_err("missing");
        assert!(err.to_string().contains("HARVEST_DRIVER_BIN"));
    }
}
