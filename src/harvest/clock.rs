use std::time::Duration;

pub const DEFAULT_DURATION_SECS: u64 = 14_400;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("playback control unavailable: {0}")]
    Unavailable(String),
    #[error("unreadable clock label `{0}`")]
    BadLabel(String),
}

/// Playback side of the stream: how long it runs and where it is now.
pub trait PlaybackClock {
    /// Best effort; callers fall back to a default when this fails.
    fn duration(&mut self) -> Result<Duration, ClockError>;

    fn start_playback(&mut self) -> Result<(), ClockError>;

    /// Elapsed label as displayed, e.g. `1:02:03`. May fail transiently.
    fn current_position(&mut self) -> Result<String, ClockError>;

    fn release(&mut self) {}
}

/// Parses `SS`, `MM:SS` or `HH:MM:SS` into seconds.
pub fn parse_clock_label(label: &str) -> Result<u64, ClockError> {
    let bad = || ClockError::BadLabel(label.to_string());
    let parts = label
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>().map_err(|_| bad()))
        .collect::<Result<Vec<_>, _>>()?;

    let total = match parts.as_slice() {
        [s] => Some(*s),
        [m, s] if *s < 60 => m.checked_mul(60).and_then(|secs| secs.checked_add(*s)),
        [h, m, s] if *m < 60 && *s < 60 => h
            .checked_mul(3600)
            .and_then(|secs| secs.checked_add(m * 60 + s)),
        _ => None,
    };
    total.ok_or_else(bad)
}

/// Formats seconds as `H:MM:SS`.
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}
