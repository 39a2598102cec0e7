//! Filesystem registry for discovering running embedded servers.
//!
//! The registry is a small JSON record living next to the database file
//! (`<dbfilename>.settings`), written by whichever handle starts the server.
//! It is the only cross-process coordination mechanism: a best-effort, racy
//! cache filtered by pid liveness, not a lock. Two uncoordinated processes
//! racing to start the same identity will both launch and the second record
//! write wins; that race is accepted by design.

use crate::error::Result;
use crate::process::liveness;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk discovery record for one database identity.
///
/// Field names are part of the on-disk format; records are interchangeable
/// with other implementations of the same layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub pidfile: PathBuf,
    pub unixsocket: PathBuf,
    pub dbdir: PathBuf,
    pub dbfilename: String,
}

/// Handle to the registry record for one identity.
///
/// Only the handle that wrote the record ever deletes it; attaching guests
/// leave it alone.
#[derive(Debug)]
pub struct SettingsRegistry {
    path: PathBuf,
    owns_record: bool,
}

impl SettingsRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owns_record: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True only when the registry record exists, names a pid file that
    /// exists, and that pid file records a live process. Every failure along
    /// the chain yields false, never an error.
    pub fn is_running(&self) -> bool {
        match self.read_record() {
            Some(record) => liveness::pid_from_file(&record.pidfile) != 0,
            None => false,
        }
    }

    /// Load the record for a running instance.
    ///
    /// Returns `None` when the record is missing, unparseable, or points at
    /// a dead process; callers treat that as "no instance" and start fresh.
    pub fn load(&self) -> Option<RegistryRecord> {
        let record = self.read_record()?;
        if liveness::pid_from_file(&record.pidfile) == 0 {
            warn!(
                "registry record {} names a redis-server that is not running",
                self.path.display()
            );
            return None;
        }
        debug!("loaded registry record: {:?}", record);
        Some(record)
    }

    /// Write the record with owner-only permissions and take ownership of
    /// its cleanup.
    pub fn save(&mut self, record: &RegistryRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = open_private(&self.path)?;
        file.write_all(json.as_bytes())
            .map_err(|e| crate::error::Error::io_with_path(e, &self.path))?;
        self.owns_record = true;
        debug!("saved registry record to {}", self.path.display());
        Ok(())
    }

    /// Delete the record if this handle wrote it. Best-effort.
    pub fn remove(&mut self) {
        if !self.owns_record {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "failed to remove registry record {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
        self.owns_record = false;
    }

    pub fn owns_record(&self) -> bool {
        self.owns_record
    }

    fn read_record(&self) -> Option<RegistryRecord> {
        let raw = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

/// Open a file for writing with mode 0600. The record can contain sensitive
/// path information, so it must never be group or world readable.
fn open_private(path: &Path) -> Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| crate::error::Error::io_with_path(e, path))
}
