use anyhow::Result;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};

use crate::commands::CommandReport;
use crate::error::HarvestError;
use crate::harvest::batch::BatchWriter;
use crate::harvest::clock::{PlaybackClock, format_hms};
use crate::harvest::config::HarvestConfig;
use crate::harvest::lock::OutputLock;
use crate::harvest::pacer::{CancelFlag, WallClockPacer};
use crate::harvest::session::{HarvestOutcome, HarvestSession, SessionSettings};
use crate::harvest::source::ContentSource;
use crate::webdriver;
use crate::webdriver::adapters::{WebDriverChat, WebDriverClock};

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub url: String,
    pub output: PathBuf,
    pub echo: bool,
}

fn cancel_on_ctrlc() -> CancelFlag {
    let cancel = CancelFlag::new();
    if let Err(err) = cancel.install_ctrlc_handler() {
        warn!("ctrl-c handler unavailable, stop requests will kill the process: {err}");
    }
    cancel
}

/// Runs one session over the given adapters. Callers hold the output lock.
pub(crate) fn run_session<C, S>(
    clock: C,
    source: S,
    settings: SessionSettings,
    batch_size: usize,
    output: &Path,
) -> Result<HarvestOutcome, HarvestError>
where
    C: PlaybackClock,
    S: ContentSource,
{
    let mut session = HarvestSession::new(
        clock,
        source,
        WallClockPacer::new(),
        BatchWriter::new(output, batch_size),
        settings,
    )
    .with_cancel(cancel_on_ctrlc());
    session.run()
}

pub(crate) fn lock_output(output: &Path) -> Result<OutputLock, HarvestError> {
    let lock = OutputLock::acquire(output)?;
    info!("output locked via {}", lock.path().display());
    Ok(lock)
}

pub(crate) fn describe(report: &mut CommandReport, outcome: &HarvestOutcome) {
    report.detail(format!("output={}", outcome.output.display()));
    report.detail(format!("end_reason={}", outcome.end_reason.as_str()));
    report.detail(format!(
        "duration={}{}",
        format_hms(outcome.duration_secs),
        if outcome.duration_defaulted {
            " (default)"
        } else {
            ""
        }
    ));
    report.detail(format!("elapsed={}", format_hms(outcome.elapsed_secs)));
    report.detail(format!("messages.accepted={}", outcome.counters.accepted));
    report.detail(format!("rows_written={}", outcome.rows_written));
    report.detail(format!("flushes={}", outcome.flushes));
    report.detail(format!("iterations={}", outcome.counters.iterations));
    report.detail(format!(
        "position_failures={}",
        outcome.counters.position_failures
    ));
    report.detail(format!("skipped_entries={}", outcome.counters.skipped_entries));
    report.detail(format!("transient_reads={}", outcome.counters.transient_reads));
    report.detail(format!("reconnects={}", outcome.counters.reconnects));
    if outcome.counters.failed_reconnects > 0 {
        report.detail(format!(
            "failed_reconnects={}",
            outcome.counters.failed_reconnects
        ));
    }
    if outcome.rows_written == 0 {
        report.detail("no messages accepted; no output written");
    }
}

pub fn run(cfg: &HarvestConfig, opts: &HarvestOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("harvest");
    info!("starting harvest of {}", opts.url);
    let _lock = lock_output(&opts.output)?;

    let driver = webdriver::launch(&cfg.webdriver)
        .map_err(|err| HarvestError::Setup(format!("{err:#}")))?;
    let clock = WebDriverClock::new(Rc::clone(&driver), cfg.selectors.clone());
    let chat = WebDriverChat::new(driver, cfg.selectors.clone(), opts.url.as_str());

    let mut settings = SessionSettings::from(&cfg.harvest);
    settings.echo_messages &= opts.echo;
    let outcome = run_session(clock, chat, settings, cfg.harvest.batch_size, &opts.output)?;

    report.detail(format!("url={}", opts.url));
    describe(&mut report, &outcome);
    Ok(report)
}
