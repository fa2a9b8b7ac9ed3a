use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::HarvestError;
use crate::harvest::batch::{BatchWriter, MessageSink};
use crate::harvest::clock::{PlaybackClock, format_hms};
use crate::harvest::config::HarvestLoopConfig;
use crate::harvest::dedup::Deduplicator;
use crate::harvest::message::Message;
use crate::harvest::pacer::{CancelFlag, Pacer};
use crate::harvest::source::{ContentSource, SourceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Starting,
    Playing,
    Polling,
    Draining,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    DurationReached,
    Cancelled,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DurationReached => "duration-reached",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub iterations: u64,
    pub accepted: u64,
    pub position_failures: u64,
    pub skipped_entries: u64,
    pub transient_reads: u64,
    pub reconnects: u64,
    pub failed_reconnects: u64,
    pub progress_reports: u64,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub progress_every_secs: u64,
    pub default_duration: Duration,
    pub settle: Duration,
    pub echo_messages: bool,
}

impl From<&HarvestLoopConfig> for SessionSettings {
    fn from(cfg: &HarvestLoopConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            progress_every_secs: cfg.progress_every_secs.max(1),
            default_duration: cfg.default_duration(),
            settle: Duration::from_secs(cfg.settle_secs),
            echo_messages: cfg.echo_messages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub output: PathBuf,
    pub end_reason: EndReason,
    pub duration_secs: u64,
    pub duration_defaulted: bool,
    pub elapsed_secs: u64,
    pub flushes: usize,
    pub rows_written: usize,
    pub counters: SessionCounters,
}

/// One harvest run. Owns both adapters, the seen-set, the batch and the
/// counters; nothing outlives it.
pub struct HarvestSession<C, S, P, W = BatchWriter> {
    clock: C,
    source: S,
    pacer: P,
    dedup: Deduplicator,
    writer: W,
    settings: SessionSettings,
    echo_out: Box<dyn Write>,
    cancel: CancelFlag,
    counters: SessionCounters,
    state: HarvestState,
    last_progress_sec: Option<u64>,
}

impl<C, S, P, W> HarvestSession<C, S, P, W>
where
    C: PlaybackClock,
    S: ContentSource,
    P: Pacer,
    W: MessageSink,
{
    pub fn new(clock: C, source: S, pacer: P, writer: W, settings: SessionSettings) -> Self {
        Self {
            clock,
            source,
            pacer,
            dedup: Deduplicator::new(),
            writer,
            settings,
            echo_out: Box::new(io::stdout()),
            cancel: CancelFlag::new(),
            counters: SessionCounters::default(),
            state: HarvestState::Starting,
            last_progress_sec: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[cfg(test)]
    pub fn with_echo_output(mut self, out: impl Write + 'static) -> Self {
        self.echo_out = Box::new(out);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> HarvestState {
        self.state
    }

    /// Runs the session to completion. Adapters are released on every path.
    pub fn run(&mut self) -> Result<HarvestOutcome, HarvestError> {
        let result = self.drive();
        self.transition(if result.is_ok() {
            HarvestState::Done
        } else {
            HarvestState::Aborted
        });
        self.source.release();
        self.clock.release();
        result
    }

    fn transition(&mut self, next: HarvestState) {
        debug!(from = ?self.state, to = ?next, "harvest state change");
        self.state = next;
    }

    fn drive(&mut self) -> Result<HarvestOutcome, HarvestError> {
        info!(
            "writing batches of {} to {}",
            self.writer.capacity(),
            self.writer.path().display()
        );
        let (duration, duration_defaulted) = self.start()?;

        self.transition(HarvestState::Playing);
        self.pacer.start();

        self.transition(HarvestState::Polling);
        let end_reason = self.poll_until_done(duration)?;

        self.transition(HarvestState::Draining);
        if let Some(flush) = self.writer.flush()? {
            info!(
                "wrote final batch of {} messages to {}",
                flush.rows,
                self.writer.path().display()
            );
        } else if self.dedup.is_empty() {
            info!("no messages seen; nothing written");
        }

        info!(
            "harvest completed ({}). total messages collected: {}",
            end_reason.as_str(),
            self.counters.accepted
        );

        Ok(HarvestOutcome {
            output: self.writer.path().to_path_buf(),
            end_reason,
            duration_secs: duration.as_secs(),
            duration_defaulted,
            elapsed_secs: self.pacer.elapsed().as_secs(),
            flushes: self.writer.flushes(),
            rows_written: self.writer.rows_written(),
            counters: self.counters,
        })
    }

    fn start(&mut self) -> Result<(Duration, bool), HarvestError> {
        info!("opening content source");
        self.source
            .open()
            .map_err(|err| HarvestError::Setup(format!("could not open content source: {err}")))?;
        if !self.settings.settle.is_zero() {
            self.pacer.sleep(self.settings.settle);
        }

        let (duration, defaulted) = self.resolve_duration();
        info!("stream duration: {}", format_hms(duration.as_secs()));

        self.clock
            .start_playback()
            .map_err(|err| HarvestError::Setup(format!("could not start playback: {err}")))?;
        info!("started playback");

        self.source
            .attach()
            .map_err(|err| HarvestError::Setup(format!("could not locate messages: {err}")))?;
        info!("attached to message view");

        Ok((duration, defaulted))
    }

    fn resolve_duration(&mut self) -> (Duration, bool) {
        let fallback = self.settings.default_duration;
        match self.clock.duration() {
            Ok(duration) if !duration.is_zero() => (duration, false),
            Ok(_) => {
                warn!(
                    "stream reported zero duration; using default {}",
                    format_hms(fallback.as_secs())
                );
                (fallback, true)
            }
            Err(err) => {
                warn!(
                    "could not get stream duration: {err}; using default {}",
                    format_hms(fallback.as_secs())
                );
                (fallback, true)
            }
        }
    }

    fn poll_until_done(&mut self, duration: Duration) -> Result<EndReason, HarvestError> {
        let duration_secs = duration.as_secs();
        loop {
            let elapsed = self.pacer.elapsed();
            if elapsed >= duration {
                info!("reached end of stream");
                return Ok(EndReason::DurationReached);
            }
            if self.cancel.is_cancelled() {
                info!("stop requested; draining");
                return Ok(EndReason::Cancelled);
            }

            self.counters.iterations += 1;
            self.poll_once()?;
            self.report_progress(elapsed.as_secs(), duration_secs);
            self.pacer.sleep(self.settings.poll_interval);
        }
    }

    fn poll_once(&mut self) -> Result<(), HarvestError> {
        let position = match self.clock.current_position() {
            Ok(position) => position,
            Err(err) => {
                self.counters.position_failures += 1;
                warn!("could not read playback position: {err}");
                return Ok(());
            }
        };

        let entries = match self.source.list_visible_messages() {
            Ok(entries) => entries,
            Err(SourceError::Transient(reason)) => {
                self.counters.transient_reads += 1;
                warn!("could not read visible messages: {reason}");
                return Ok(());
            }
            Err(err) => {
                error!("error during iteration: {err}");
                self.reconnect();
                return Ok(());
            }
        };

        for entry in &entries {
            let candidate = match entry.extract(&position) {
                Ok(candidate) => candidate,
                Err(err) => {
                    self.counters.skipped_entries += 1;
                    debug!("skipping entry: {err}");
                    continue;
                }
            };
            if self.dedup.accept(&candidate) {
                self.admit(candidate)?;
            }
        }
        Ok(())
    }

    fn admit(&mut self, message: Message) -> Result<(), HarvestError> {
        self.counters.accepted += 1;
        self.echo(&message);

        match self.writer.add(message) {
            Ok(Some(flush)) => {
                info!(
                    "batch full ({} messages); {} {} ({} rows total)",
                    flush.rows,
                    if flush.created { "created" } else { "appended to" },
                    self.writer.path().display(),
                    flush.total_rows
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                error!("{err}; attempting final flush before aborting");
                if let Err(retry) = self.writer.flush() {
                    error!("final flush failed: {retry}");
                }
                Err(err)
            }
        }
    }

    fn echo(&mut self, message: &Message) {
        if !self.settings.echo_messages {
            return;
        }
        if let Err(err) = writeln!(self.echo_out, "{message}") {
            warn!("could not echo messages, echo disabled for this session: {err}");
            self.settings.echo_messages = false;
        }
    }

    fn reconnect(&mut self) {
        self.counters.reconnects += 1;
        match self.source.reconnect() {
            Ok(()) => info!("reattached to message view"),
            Err(err) => {
                self.counters.failed_reconnects += 1;
                error!("reattach failed, retrying next iteration: {err}");
            }
        }
    }

    fn report_progress(&mut self, elapsed_secs: u64, duration_secs: u64) {
        if elapsed_secs % self.settings.progress_every_secs != 0
            || self.last_progress_sec == Some(elapsed_secs)
        {
            return;
        }
        self.last_progress_sec = Some(elapsed_secs);
        self.counters.progress_reports += 1;
        info!(
            "progress: {} / {}",
            format_hms(elapsed_secs),
            format_hms(duration_secs)
        );
        info!(
            "total messages collected: {} (seen {})",
            self.counters.accepted,
            self.dedup.len()
        );
    }

    #[cfg(test)]
    pub(crate) fn into_parts(self) -> (C, S, P, W) {
        (self.clock, self.source, self.pacer, self.writer)
    }
}
