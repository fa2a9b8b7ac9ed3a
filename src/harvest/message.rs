use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

pub const CSV_HEADER: [&str; 4] = ["Video Time", "Commenter", "Time", "Comment"];

// Unit separator; cannot appear in rendered chat text.
const FIELD_SEPARATOR: u8 = 0x1f;

/// One observed chat message. `stream_position` is the playback label at the
/// poll that observed it, not the time the author sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    stream_position: String,
    author: String,
    author_timestamp: String,
    body: String,
}

impl Message {
    pub fn new(
        stream_position: impl Into<String>,
        author: impl Into<String>,
        author_timestamp: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            stream_position: stream_position.into(),
            author: author.into(),
            author_timestamp: author_timestamp.into(),
            body: body.into(),
        }
    }

    pub fn csv_row(&self) -> [&str; 4] {
        [
            &self.stream_position,
            &self.author,
            &self.author_timestamp,
            &self.body,
        ]
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.author.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(self.author_timestamp.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(self.body.as_bytes());
        Fingerprint(hasher.finalize().into())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.stream_position, self.author, self.author_timestamp, self.body
        )
    }
}

/// Identity of a logical message: author, author timestamp and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("entry is missing its {0} field")]
    MissingField(&'static str),
}

/// A visible entry as read from the content source. Any field may be
/// missing when the entry was re-rendered mid-read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RawEntry {
    #[cfg(test)]
    pub fn complete(
        author: impl Into<String>,
        timestamp: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            author: Some(author.into()),
            timestamp: Some(timestamp.into()),
            body: Some(body.into()),
        }
    }

    /// Stamps the entry with the playback position read in the same poll.
    pub fn extract(&self, stream_position: &str) -> Result<Message, ExtractError> {
        let author = self
            .author
            .as_deref()
            .ok_or(ExtractError::MissingField("author"))?;
        let timestamp = self
            .timestamp
            .as_deref()
            .ok_or(ExtractError::MissingField("timestamp"))?;
        let body = self
            .body
            .as_deref()
            .ok_or(ExtractError::MissingField("body"))?;
        Ok(Message::new(stream_position, author, timestamp, body))
    }
}
