pub mod adapters;
pub mod client;
pub mod driver;

use anyhow::{Context, Result};
use std::rc::Rc;
use tracing::info;

use crate::harvest::config::WebDriverConfig;
use client::WebDriver;
use driver::DriverProcess;

/// Connects to the configured WebDriver endpoint, or spawns a local
/// chromedriver when none is configured.
pub fn launch(cfg: &WebDriverConfig) -> Result<Rc<WebDriver>> {
    let (url, process) = match &cfg.url {
        Some(url) => (url.clone(), None),
        None => {
            let process = DriverProcess::spawn(cfg)?;
            (process.url().to_string(), Some(process))
        }
    };
    info!("opening browser session via {url}");
    let driver = WebDriver::connect(&url, cfg)
        .with_context(|| format!("failed to start browser session at {url}"))?
        .with_service(process);
    Ok(Rc::new(driver))
}
