//! Append-only, human-readable per-peer event log, §4.8.
//!
//! Advisory only: nothing reads this file back to recover state. Each line
//! is `[LC:<lamport>] <wall-clock> <message>`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct EventLog {
    file: Option<Mutex<File>>,
}

impl EventLog {
    /// Open (creating if absent) `peer_<port>_<region>.log` under `dir`.
    pub fn open(dir: &Path, port: u16, region: &str) -> std::io::Result<Self> {
        let slug = region.to_lowercase().replace(' ', "_");
        let path: PathBuf = dir.join(format!("peer_{port}_{slug}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Some(Mutex::new(file)) })
    }

    /// A log that discards every entry, for tests and dry runs.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn record(&self, lamport: u64, message: &str) {
        let Some(file) = &self.file else { return };
        let now = time::OffsetDateTime::now_local()
            .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        let format = time::format_description::well_known::Rfc3339;
        let stamp = now.format(&format).unwrap_or_else(|_| "unknown-time".to_string());
        let line = format!("[LC:{lamport}] {stamp} {message}\n");
        let mut file = file.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Err(err) = file.write_all(line.as_bytes()) {
            tracing::warn!(error = %err, "failed to write event log entry");
        }
    }
}
