use crate::harvest::message::RawEntry;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Frame or connection lost mid-run; reattaching is expected to help.
    #[error("content source connection lost: {0}")]
    ConnectionLost(String),
    /// One poll failed; the next one may succeed as-is.
    #[error("content source read failed: {0}")]
    Transient(String),
    /// The source cannot be located at all.
    #[error("content source unavailable: {0}")]
    Setup(String),
}

/// The live message view. Entries are not stable across calls: the view is
/// virtualized and re-renders as it scrolls.
pub trait ContentSource {
    /// Loads the page or stream that hosts the message view.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Locates the message view once playback is running.
    fn attach(&mut self) -> Result<(), SourceError>;

    fn list_visible_messages(&mut self) -> Result<Vec<RawEntry>, SourceError>;

    fn reconnect(&mut self) -> Result<(), SourceError> {
        self.attach()
    }

    fn release(&mut self) {}
}
