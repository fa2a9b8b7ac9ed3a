use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::commands::CommandReport;
use crate::commands::harvest::{describe, lock_output, run_session};
use crate::error::HarvestError;
use crate::harvest::config::HarvestConfig;
use crate::harvest::replay::ReplayScript;
use crate::harvest::session::SessionSettings;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub fixture: PathBuf,
    pub output: PathBuf,
    pub echo: bool,
}

pub fn run(cfg: &HarvestConfig, opts: &ReplayOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("replay");
    let script = ReplayScript::load(&opts.fixture)
        .map_err(|err| HarvestError::Setup(format!("{err:#}")))?;
    info!(
        "replaying {} ({} frames)",
        opts.fixture.display(),
        script.frames.len()
    );
    let _lock = lock_output(&opts.output)?;

    let (clock, source) = script.into_adapters();
    let mut settings = SessionSettings::from(&cfg.harvest);
    settings.settle = Duration::ZERO;
    settings.echo_messages &= opts.echo;
    let outcome = run_session(clock, source, settings, cfg.harvest.batch_size, &opts.output)?;

    report.detail(format!("fixture={}", opts.fixture.display()));
    describe(&mut report, &outcome);
    Ok(report)
}
