use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::HarvestError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockPayload {
    pub pid: u32,
    pub build_uuid: String,
    pub started_at: String,
}

/// Exclusive claim on one output file. Two harvesters appending to the same
/// CSV would interleave batches and write the header twice.
#[derive(Debug)]
pub struct OutputLock {
    path: PathBuf,
    file: File,
}

pub fn lock_path_for(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    output.with_file_name(name)
}

impl OutputLock {
    pub fn acquire(output: &Path) -> Result<Self, HarvestError> {
        let path = lock_path_for(output);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                HarvestError::Setup(format!("failed to open lock {}: {err}", path.display()))
            })?;

        if file.try_lock_exclusive().is_err() {
            let mut raw = String::new();
            let _ = file.read_to_string(&mut raw);
            let pid = serde_json::from_str::<LockPayload>(&raw)
                .map(|payload| payload.pid.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(HarvestError::Locked {
                path: output.to_path_buf(),
                pid,
            });
        }

        let payload = LockPayload {
            pid: std::process::id(),
            build_uuid: env!("BUILD_UUID").to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        let encoded = serde_json::to_string(&payload)
            .map_err(|err| HarvestError::Setup(format!("failed to encode lock payload: {err}")))?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(encoded.as_bytes()))
            .and_then(|_| file.sync_all())
            .map_err(|err| {
                HarvestError::Setup(format!("failed to write lock {}: {err}", path.display()))
            })?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn read_payload(path: &Path) -> Option<LockPayload> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}
