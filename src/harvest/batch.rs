use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::HarvestError;
use crate::harvest::message::{CSV_HEADER, Message};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub rows: usize,
    pub created: bool,
    pub total_rows: usize,
}

/// Buffers accepted messages and writes them to a CSV destination in
/// batches. The first flush of a session replaces the file and writes the
/// header; later flushes append.
#[derive(Debug)]
pub struct BatchWriter {
    path: PathBuf,
    capacity: usize,
    batch: Vec<Message>,
    flushes: usize,
    rows_written: usize,
}

impl BatchWriter {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            path: path.into(),
            capacity,
            batch: Vec::with_capacity(capacity),
            flushes: 0,
            rows_written: 0,
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }
}

/// Destination for accepted messages, flushed in batches.
pub trait MessageSink {
    fn path(&self) -> &Path;

    fn capacity(&self) -> usize;

    fn flushes(&self) -> usize;

    fn rows_written(&self) -> usize;

    /// Buffers `message`, flushing when the batch reaches capacity.
    fn add(&mut self, message: Message) -> Result<Option<FlushOutcome>, HarvestError>;

    /// Writes every buffered row or none of them. On failure the batch stays
    /// buffered so the caller can decide whether to retry.
    fn flush(&mut self) -> Result<Option<FlushOutcome>, HarvestError>;
}

impl MessageSink for BatchWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn flushes(&self) -> usize {
        self.flushes
    }

    fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn add(&mut self, message: Message) -> Result<Option<FlushOutcome>, HarvestError> {
        self.batch.push(message);
        if self.batch.len() >= self.capacity {
            return self.flush();
        }
        Ok(None)
    }

    fn flush(&mut self) -> Result<Option<FlushOutcome>, HarvestError> {
        if self.batch.is_empty() {
            return Ok(None);
        }

        let created = self.flushes == 0;
        encode_rows(&self.batch, created)
            .and_then(|bytes| {
                if created {
                    replace_file(&self.path, &bytes)
                } else {
                    append_all_or_nothing(&self.path, &bytes)
                }
            })
            .map_err(|source| HarvestError::Persistence {
                path: self.path.clone(),
                source,
            })?;

        let rows = self.batch.len();
        self.batch.clear();
        self.flushes += 1;
        self.rows_written += rows;

        Ok(Some(FlushOutcome {
            rows,
            created,
            total_rows: self.rows_written,
        }))
    }
}

fn encode_rows(messages: &[Message], with_header: bool) -> io::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if with_header {
        writer.write_record(CSV_HEADER)?;
    }
    for message in messages {
        writer.write_record(message.csv_row())?;
    }
    writer.into_inner().map_err(|err| err.into_error())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn append_all_or_nothing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let before = file.metadata()?.len();

    match file.write_all(bytes).and_then(|()| file.sync_data()) {
        Ok(()) => Ok(()),
        Err(err) => {
            // Drop the partial tail so the file still ends on a row boundary.
            if let Err(truncate) = file.set_len(before) {
                warn!(
                    "could not drop partial rows from {}: {truncate}",
                    path.display()
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn msg(i: usize) -> Message {
        Message::new(format!("0:{i:02}"), format!("user{i}"), "1:00 PM", format!("message {i}"))
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .expect("open csv");
        reader
            .records()
            .map(|r| r.expect("record").iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn full_batch_flushes_once_and_empties_buffer() {
        let tmp = tempdir().expect("tempdir");
        let mut writer = BatchWriter::new(tmp.path().join("out.csv"), DEFAULT_BATCH_SIZE);

        for i in 0..499 {
            assert_eq!(writer.add(msg(i)).expect("add"), None);
        }
        let outcome = writer.add(msg(499)).expect("add").expect("auto flush");
        assert_eq!(outcome.rows, 500);
        assert!(outcome.created);
        assert_eq!(writer.flushes(), 1);
        assert_eq!(writer.pending(), 0);

        assert_eq!(writer.add(msg(500)).expect("add"), None);
        assert_eq!(writer.flushes(), 1);
        assert_eq!(writer.pending(), 1);
    }

    #[test]
    fn header_is_written_once_across_many_flushes() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out.csv");
        let mut writer = BatchWriter::new(&path, 2);

        for i in 0..7 {
            writer.add(msg(i)).expect("add");
        }
        writer.flush().expect("final flush");
        assert_eq!(writer.flushes(), 4);

        let rows = read_rows(&path);
        let headers = rows.iter().filter(|r| r[0] == "Video Time").count();
        assert_eq!(headers, 1);
        assert_eq!(rows[0], CSV_HEADER);
        assert_eq!(rows.len(), 8);
    }

    #[test]
    fn rows_round_trip_in_admission_order() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out.csv");
        let messages = vec![
            Message::new("0:05", "zed", "12:00", "first, with comma"),
            Message::new("0:06", "amy", "11:59", "she said \"hi\""),
            Message::new("0:07", "মিতা", "12:01", "line one\nline two"),
        ];

        let mut writer = BatchWriter::new(&path, 2);
        for message in &messages {
            writer.add(message.clone()).expect("add");
        }
        writer.flush().expect("flush");

        let rows = read_rows(&path);
        assert_eq!(rows.len(), messages.len() + 1);
        for (row, message) in rows[1..].iter().zip(&messages) {
            assert_eq!(row, &message.csv_row());
        }
    }

    #[test]
    fn first_flush_truncates_previous_output() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out.csv");
        fs::write(&path, "stale,rows,from,before\n").expect("seed");

        let mut writer = BatchWriter::new(&path, 10);
        writer.add(msg(1)).expect("add");
        writer.flush().expect("flush");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("stale"));
        assert!(raw.starts_with("Video Time,Commenter,Time,Comment\n"));
    }

    #[test]
    fn failed_flush_keeps_batch_for_retry() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("blocked");
        fs::create_dir_all(path.join("inner")).expect("mkdir");

        let mut writer = BatchWriter::new(&path, 10);
        writer.add(msg(1)).expect("add");
        writer.add(msg(2)).expect("add");

        let err = writer.flush().expect_err("destination is a directory");
        assert!(matches!(err, HarvestError::Persistence { .. }));
        assert_eq!(writer.pending(), 2);
        assert_eq!(writer.flushes(), 0);

        fs::remove_dir_all(&path).expect("unblock");
        let outcome = writer.flush().expect("retry").expect("rows");
        assert_eq!(outcome.rows, 2);
        assert_eq!(read_rows(&path).len(), 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_append_reports_the_write_error_even_if_truncate_fails() {
        // Writes to /dev/full fail with ENOSPC and the device cannot be truncated.
        let err = append_all_or_nothing(Path::new("/dev/full"), b"0:01,ana,1:00,hi\n")
            .expect_err("device is full");
        assert_eq!(err.raw_os_error(), Some(28));
    }

    #[test]
    fn empty_flush_creates_nothing() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out.csv");
        let mut writer = BatchWriter::new(&path, 10);
        assert_eq!(writer.flush().expect("flush"), None);
        assert!(!path.exists());
    }
}
