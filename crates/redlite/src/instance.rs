//! Working-directory provisioning for one embedded server instance.
//!
//! Each started server gets a private, permission-restricted temporary
//! directory holding its pid file, log file, socket and rendered
//! configuration. The directory is removed by the supervisor when the last
//! handle releases the instance.

use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem layout of one server instance.
#[derive(Debug, Clone)]
pub struct InstanceDirs {
    /// The owning directory; everything below is a child of it unless the
    /// caller fixed the socket path explicitly.
    pub redis_dir: PathBuf,
    pub pidfile: PathBuf,
    pub logfile: PathBuf,
    pub socket_path: PathBuf,
    pub config_path: PathBuf,
}

impl InstanceDirs {
    /// Create a uniquely named instance directory.
    ///
    /// The directory is created mode 0700 (tempfile's default for
    /// directories). A caller-fixed socket path wins over the default
    /// location inside the directory. Creation failure is fatal: no partial
    /// state is retained.
    pub fn provision(socket_override: Option<&Path>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("redlite-")
            .tempdir()
            .map_err(|e| Error::io_with_path(e, env::temp_dir()))?
            .keep();
        debug!("created instance directory {}", dir.display());

        let socket_path = match socket_override {
            Some(path) => path.to_path_buf(),
            None => dir.join("redis.socket"),
        };

        Ok(Self {
            pidfile: dir.join("redis.pid"),
            logfile: dir.join("redis.log"),
            config_path: dir.join("redis.config"),
            socket_path,
            redis_dir: dir,
        })
    }
}

/// Resolve a bare filename against the current working directory.
///
/// Database files and socket paths follow the "local file, explicit
/// location" convention: a name with no directory component refers to the
/// caller's cwd, anything else is used as given.
pub fn resolve_bare_path(path: &Path) -> Result<PathBuf> {
    if path.parent() == Some(Path::new("")) {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    } else {
        Ok(path.to_path_buf())
    }
}
