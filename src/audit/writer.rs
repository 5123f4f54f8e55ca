//! Daily JSONL activity log files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{ActivityEntry, ActivityRecorder};
use crate::{AppError, Result};

/// Appends activity entries to `<log_dir>/activity-YYYY-MM-DD.jsonl`,
/// one JSON object per line.
///
/// The file an entry lands in is named after the entry's own timestamp,
/// so rotation is simply a date change; there is no persistent handle to
/// roll over. Entries are low-volume, so each record opens its file in
/// append mode and closes it again.
pub struct JsonlActivityRecorder {
    log_dir: PathBuf,
    // Serializes appends so concurrent records cannot interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlActivityRecorder {
    /// Build a recorder storing its daily files under `log_dir`, creating
    /// the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Config(format!(
                "failed to create activity log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn open_log(&self, entry: &ActivityEntry) -> Result<File> {
        let path = self
            .log_dir
            .join(format!("activity-{}.jsonl", entry.timestamp.date_naive()));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AppError::Config(format!("failed to open activity log {}: {e}", path.display()))
            })
    }
}

impl ActivityRecorder for JsonlActivityRecorder {
    fn record(&self, entry: ActivityEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Config(format!("failed to serialize activity entry: {e}")))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Config("activity writer mutex poisoned".into()))?;
        let mut file = self.open_log(&entry)?;
        writeln!(file, "{line}")
            .map_err(|e| AppError::Config(format!("activity write failed: {e}")))
    }
}
