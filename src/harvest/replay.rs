//! Recorded polls played back through the clock and source traits, for
//! offline runs and CLI tests.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::harvest::clock::{ClockError, PlaybackClock, parse_clock_label};
use crate::harvest::message::RawEntry;
use crate::harvest::source::{ContentSource, SourceError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayFrame {
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub connection_lost: bool,
    #[serde(default)]
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub play_fails: bool,
    #[serde(default)]
    pub chat_missing: bool,
    #[serde(default)]
    pub frames: Vec<ReplayFrame>,
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay fixture {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse replay fixture {}", path.display()))
    }

    /// Clock and source over the same script, sharing one frame cursor.
    pub fn into_adapters(self) -> (ReplayClock, ReplaySource) {
        let shared = Rc::new(Shared {
            script: self,
            cursor: Cell::new(0),
        });
        (
            ReplayClock {
                shared: Rc::clone(&shared),
            },
            ReplaySource {
                shared,
                attached: false,
            },
        )
    }
}

#[derive(Debug)]
struct Shared {
    script: ReplayScript,
    cursor: Cell<usize>,
}

impl Shared {
    fn frame(&self) -> Option<&ReplayFrame> {
        let frames = &self.script.frames;
        let last = frames.len().checked_sub(1)?;
        frames.get(self.cursor.get().min(last))
    }

    fn advance(&self) {
        self.cursor.set(self.cursor.get().saturating_add(1));
    }
}

#[derive(Debug)]
pub struct ReplayClock {
    shared: Rc<Shared>,
}

impl PlaybackClock for ReplayClock {
    fn duration(&mut self) -> Result<Duration, ClockError> {
        let label = self
            .shared
            .script
            .duration
            .as_deref()
            .ok_or_else(|| ClockError::Unavailable("fixture has no duration".into()))?;
        parse_clock_label(label).map(Duration::from_secs)
    }

    fn start_playback(&mut self) -> Result<(), ClockError> {
        if self.shared.script.play_fails {
            return Err(ClockError::Unavailable("play control not found".into()));
        }
        Ok(())
    }

    /// A frame without a position is used up by the failed read, since the
    /// loop skips listing for that poll.
    fn current_position(&mut self) -> Result<String, ClockError> {
        let Some(frame) = self.shared.frame() else {
            return Ok("0:00".to_string());
        };
        match &frame.position {
            Some(position) => Ok(position.clone()),
            None => {
                self.shared.advance();
                Err(ClockError::Unavailable("position not rendered".into()))
            }
        }
    }
}

#[derive(Debug)]
pub struct ReplaySource {
    shared: Rc<Shared>,
    attached: bool,
}

impl ContentSource for ReplaySource {
    fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn attach(&mut self) -> Result<(), SourceError> {
        if self.shared.script.chat_missing {
            return Err(SourceError::Setup("fixture has no message view".into()));
        }
        self.attached = true;
        Ok(())
    }

    fn list_visible_messages(&mut self) -> Result<Vec<RawEntry>, SourceError> {
        if !self.attached {
            return Err(SourceError::ConnectionLost("not attached".into()));
        }
        let Some(frame) = self.shared.frame() else {
            return Ok(Vec::new());
        };
        let result = if frame.connection_lost {
            self.attached = false;
            Err(SourceError::ConnectionLost("recorded disconnect".into()))
        } else {
            Ok(frame.entries.clone())
        };
        self.shared.advance();
        result
    }

    fn release(&mut self) {
        self.attached = false;
    }
}
