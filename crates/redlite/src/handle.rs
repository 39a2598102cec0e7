//! The user-facing embedded Redis handle.
//!
//! A [`Redis`] wraps a connection to one embedded redis-server instance and
//! supervises that instance's lifetime: construction attaches to a running
//! server for the same database file when the registry knows of one, or
//! provisions a working directory and starts a fresh server otherwise.
//! [`Redis::close`] releases the handle and shuts the server down only when
//! this was the last connected client, determined by asking the server
//! itself rather than by in-process bookkeeping (handles in unrelated
//! processes share no state beyond the filesystem).
//!
//! Handles implement [`redis::ConnectionLike`], so the whole
//! [`redis::Commands`] surface works on them directly.

use crate::config::{self, SettingValue, Settings};
use crate::error::{Error, Result};
use crate::instance::{self, InstanceDirs};
use crate::logfile;
use crate::process::{launcher, liveness, shutdown};
use crate::registry::{RegistryRecord, SettingsRegistry};
use redis::ConnectionLike;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_DBFILENAME: &str = "redis.db";

/// Builder for [`Redis`] handles.
#[derive(Debug, Clone)]
pub struct RedisBuilder {
    db_file: Option<PathBuf>,
    socket_path: Option<PathBuf>,
    overrides: Settings,
    start_timeout: Duration,
    executable: Option<String>,
    remote: Option<(String, u16)>,
}

impl Default for RedisBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RedisBuilder {
    pub fn new() -> Self {
        Self {
            db_file: None,
            socket_path: None,
            overrides: Settings::new(),
            start_timeout: launcher::DEFAULT_START_TIMEOUT,
            executable: None,
            remote: None,
        }
    }

    /// Database file backing the embedded server. Two handles opened on the
    /// same file share one server process; a bare filename refers to the
    /// current working directory.
    pub fn db_file(mut self, path: impl AsRef<Path>) -> Self {
        self.db_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Fix the Unix socket path instead of defaulting to a file inside the
    /// instance directory. A handle with an explicit socket never attaches
    /// to a registry-discovered instance.
    pub fn unix_socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.socket_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override a server setting. Repeatable settings take a list value.
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Suppress a default server setting entirely.
    pub fn unset_setting(mut self, key: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), SettingValue::Unset);
        self
    }

    /// Ceiling for every launch and readiness wait loop. Default 10s.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Path to the redis-server binary to launch.
    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Connect to an external server instead of embedding one. With a
    /// remote set, no process is ever launched and connection errors
    /// propagate from the client library unchanged.
    pub fn remote(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote = Some((host.into(), port));
        self
    }

    /// Attach to or start the server and return a ready handle.
    pub fn open(self) -> Result<Redis> {
        if let Some((host, port)) = self.remote {
            debug!("remote host/port given, not using an embedded server");
            let client = redis::Client::open(redis::ConnectionInfo {
                addr: redis::ConnectionAddr::Tcp(host, port),
                redis: redis::RedisConnectionInfo::default(),
            })?;
            let conn = client.get_connection()?;
            return Ok(Redis {
                conn: Some(conn),
                dirs: None,
                socket_path: None,
                pidfile: None,
                logfile: None,
                dbdir: None,
                dbfilename: DEFAULT_DBFILENAME.to_string(),
                registry: None,
                start_timeout: self.start_timeout,
                closed: false,
            });
        }

        let socket_override = match &self.socket_path {
            Some(path) => Some(instance::resolve_bare_path(path)?),
            None => None,
        };

        let mut dbdir = None;
        let mut dbfilename = DEFAULT_DBFILENAME.to_string();
        let mut registry = None;

        if let Some(raw) = &self.db_file {
            let resolved = instance::resolve_bare_path(raw)?;
            let name = resolved.file_name().ok_or_else(|| Error::Config {
                message: format!("db file path {} has no filename", resolved.display()),
            })?;
            dbfilename = name.to_string_lossy().into_owned();
            let dir = match resolved.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => std::env::current_dir()?,
            };
            registry = Some(SettingsRegistry::new(registry_path(&dir, &dbfilename)));
            dbdir = Some(dir);
        }

        // Attach to a running instance for this identity, unless the caller
        // pinned the socket path (which forces a private instance).
        if socket_override.is_none() && registry.as_ref().is_some_and(SettingsRegistry::is_running)
        {
            if let Some(record) = registry.as_ref().and_then(SettingsRegistry::load) {
                debug!(
                    "attaching to running redis-server on socket {}",
                    record.unixsocket.display()
                );
                let client = unix_client(&record.unixsocket)?;
                let conn = launcher::connect_ready(&client, self.start_timeout, None)?;
                return Ok(Redis {
                    conn: Some(conn),
                    dirs: None,
                    socket_path: Some(record.unixsocket.clone()),
                    pidfile: Some(record.pidfile.clone()),
                    logfile: None,
                    dbdir: Some(record.dbdir.clone()),
                    dbfilename: record.dbfilename.clone(),
                    registry,
                    start_timeout: self.start_timeout,
                    closed: false,
                });
            }
            // The record went stale between the liveness check and the
            // load; fall through and start fresh.
        }

        let dirs = InstanceDirs::provision(socket_override.as_deref())?;
        let dbdir = dbdir.unwrap_or_else(|| dirs.redis_dir.clone());
        let registry =
            registry.unwrap_or_else(|| SettingsRegistry::new(registry_path(&dbdir, &dbfilename)));

        start_instance(
            dirs,
            dbdir,
            dbfilename,
            registry,
            &self.overrides,
            self.start_timeout,
            &self.executable.unwrap_or_else(launcher::default_executable),
        )
    }
}

/// Provision-and-launch path for the handle that owns the instance.
///
/// On any failure the half-built instance is reclaimed in full: the process
/// (if the pid file got that far), the instance directory, and a registry
/// record already written.
fn start_instance(
    dirs: InstanceDirs,
    dbdir: PathBuf,
    dbfilename: String,
    mut registry: SettingsRegistry,
    overrides: &Settings,
    start_timeout: Duration,
    executable: &str,
) -> Result<Redis> {
    match launch_and_connect(
        &dirs,
        &dbdir,
        &dbfilename,
        &mut registry,
        overrides,
        start_timeout,
        executable,
    ) {
        Ok((conn, logfile)) => Ok(Redis {
            conn: Some(conn),
            socket_path: Some(dirs.socket_path.clone()),
            pidfile: Some(dirs.pidfile.clone()),
            logfile: Some(logfile),
            dirs: Some(dirs),
            dbdir: Some(dbdir),
            dbfilename,
            registry: Some(registry),
            start_timeout,
            closed: false,
        }),
        Err(e) => {
            shutdown::kill_now(liveness::pid_from_file(&dirs.pidfile));
            let _ = fs::remove_dir_all(&dirs.redis_dir);
            registry.remove();
            Err(e)
        }
    }
}

fn launch_and_connect(
    dirs: &InstanceDirs,
    dbdir: &Path,
    dbfilename: &str,
    registry: &mut SettingsRegistry,
    overrides: &Settings,
    start_timeout: Duration,
    executable: &str,
) -> Result<(redis::Connection, PathBuf)> {
    let mut overrides = overrides.clone();
    // A caller-supplied logfile wins; everything else is pinned to the
    // instance layout.
    overrides
        .entry("logfile".to_string())
        .or_insert_with(|| path_value(&dirs.logfile));
    overrides.insert("pidfile".to_string(), path_value(&dirs.pidfile));
    overrides.insert("unixsocket".to_string(), path_value(&dirs.socket_path));
    overrides.insert("dbdir".to_string(), path_value(dbdir));
    overrides.insert(
        "dbfilename".to_string(),
        SettingValue::Single(dbfilename.to_string()),
    );

    let merged = config::settings(&overrides);
    let logfile = match merged.get("logfile") {
        Some(SettingValue::Single(path)) => PathBuf::from(path),
        _ => dirs.logfile.clone(),
    };

    launcher::launch(dirs, &config::render(&merged), executable, start_timeout)?;

    registry.save(&RegistryRecord {
        pidfile: dirs.pidfile.clone(),
        unixsocket: dirs.socket_path.clone(),
        dbdir: dbdir.to_path_buf(),
        dbfilename: dbfilename.to_string(),
    })?;

    let client = unix_client(&dirs.socket_path)?;
    let conn = launcher::connect_ready(&client, start_timeout, Some(&logfile))?;
    Ok((conn, logfile))
}

/// A client handle to one embedded redis-server instance.
pub struct Redis {
    conn: Option<redis::Connection>,
    /// Present only when this handle created the instance directory.
    dirs: Option<InstanceDirs>,
    socket_path: Option<PathBuf>,
    pidfile: Option<PathBuf>,
    logfile: Option<PathBuf>,
    dbdir: Option<PathBuf>,
    dbfilename: String,
    registry: Option<SettingsRegistry>,
    start_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for Redis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redis")
            .field("conn", &self.conn.as_ref().map(|_| "Connection"))
            .field("dirs", &self.dirs)
            .field("socket_path", &self.socket_path)
            .field("pidfile", &self.pidfile)
            .field("logfile", &self.logfile)
            .field("dbdir", &self.dbdir)
            .field("dbfilename", &self.dbfilename)
            .field("registry", &self.registry)
            .field("start_timeout", &self.start_timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Redis {
    /// Open a handle on a database file, starting or joining its embedded
    /// server.
    pub fn open(db_file: impl AsRef<Path>) -> Result<Self> {
        Self::builder().db_file(db_file).open()
    }

    pub fn builder() -> RedisBuilder {
        RedisBuilder::new()
    }

    /// Pid of the running server, or 0 when it cannot be determined.
    pub fn pid(&self) -> u32 {
        self.pidfile
            .as_deref()
            .map(liveness::pid_from_file)
            .unwrap_or(0)
    }

    /// Fully qualified database file path, usable to open another handle on
    /// the same instance. `None` for remote handles.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.dbdir.as_ref().map(|dir| dir.join(&self.dbfilename))
    }

    /// The instance directory, when this handle created one.
    pub fn redis_dir(&self) -> Option<&Path> {
        self.dirs.as_ref().map(|d| d.redis_dir.as_path())
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Last `lines` lines of the server log. `lines == 0` returns the whole
    /// log; `avg_line_width` sizes the backward read chunks.
    pub fn log_tail(&self, lines: usize, avg_line_width: usize) -> Result<Vec<String>> {
        logfile::tail(self.logfile_path()?, lines, avg_line_width)
    }

    /// The complete server log.
    pub fn log_contents(&self) -> Result<String> {
        logfile::contents(self.logfile_path()?)
    }

    fn logfile_path(&self) -> Result<&Path> {
        self.logfile.as_deref().ok_or_else(|| Error::Config {
            message: "log file location is only known to the handle that started the server"
                .to_string(),
        })
    }

    /// Release this handle; shuts the server down when it was the last
    /// connected client.
    ///
    /// Never fails: teardown commonly runs during uncontrolled process exit,
    /// so every failure is absorbed and logged. Calling `close` twice is a
    /// no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let pid = self.pid();
        let count = self.connection_count();
        debug!("connection count at teardown: {}", count);

        if count > 1 {
            debug!(
                "other clients still connected to the server on {:?}, releasing only this handle",
                self.socket_path
            );
            self.conn = None;
            self.socket_path = None;
            self.pidfile = None;
            return;
        }

        if pid != 0 {
            info!("last client, shutting down redis-server pid {}", pid);
            self.shutdown_server(pid);
        }
        self.conn = None;
        self.socket_path = None;

        // A pid file still naming a live process at this point is an orphan
        // the primary pid did not track.
        if let Some(pidfile) = self.pidfile.take() {
            let stale = liveness::pid_from_file(&pidfile);
            if stale != 0 {
                warn!("pid file still names live pid {}, killing it", stale);
                shutdown::kill_now(stale);
            }
        }

        if let Some(dirs) = self.dirs.take() {
            debug!("removing instance directory {}", dirs.redis_dir.display());
            if let Err(e) = fs::remove_dir_all(&dirs.redis_dir) {
                warn!(
                    "failed to remove instance directory {}: {}",
                    dirs.redis_dir.display(),
                    e
                );
            }
        }

        if let Some(registry) = self.registry.as_mut() {
            registry.remove();
        }
    }

    /// Number of active client connections, asked of the server itself.
    /// Counts connections flagged as normal or unix-socket clients; 0 when
    /// the server is unreachable.
    fn connection_count(&mut self) -> usize {
        if self.pid() == 0 {
            return 0;
        }
        let Some(conn) = self.conn.as_mut() else {
            return 0;
        };
        match redis::cmd("CLIENT").arg("LIST").query::<String>(conn) {
            Ok(listing) => count_normal_clients(&listing),
            Err(e) => {
                debug!("CLIENT LIST failed during teardown: {}", e);
                0
            }
        }
    }

    /// Escalation ladder: protocol shutdown with save, bounded wait, then
    /// SIGTERM, bounded wait, then SIGKILL.
    fn shutdown_server(&mut self, pid: u32) {
        let graceful = match self.conn.as_mut() {
            Some(conn) => match redis::cmd("SHUTDOWN").arg("SAVE").query::<()>(conn) {
                // The server exits instead of replying, so the connection
                // dropping counts as the request having been delivered.
                Ok(()) => true,
                Err(e) if e.kind() == redis::ErrorKind::IoError => {
                    debug!("connection closed by shutdown request");
                    true
                }
                Err(e) => {
                    warn!("graceful shutdown request refused: {}", e);
                    false
                }
            },
            None => false,
        };
        self.conn = None;

        if graceful && shutdown::wait_for_exit(pid, self.start_timeout) {
            debug!("redis-server pid {} exited after graceful shutdown", pid);
            return;
        }
        if !shutdown::terminate(pid, self.start_timeout) {
            warn!("redis-server pid {} survived SIGKILL", pid);
        }
    }

    fn live_conn(&mut self) -> redis::RedisResult<&mut redis::Connection> {
        self.conn.as_mut().ok_or_else(|| {
            redis::RedisError::from((redis::ErrorKind::ClientError, "handle has been closed"))
        })
    }
}

impl Drop for Redis {
    fn drop(&mut self) {
        // Safety net only; callers are expected to close() explicitly.
        self.close();
    }
}

impl ConnectionLike for Redis {
    fn req_packed_command(&mut self, cmd: &[u8]) -> redis::RedisResult<redis::Value> {
        self.live_conn()?.req_packed_command(cmd)
    }

    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        offset: usize,
        count: usize,
    ) -> redis::RedisResult<Vec<redis::Value>> {
        self.live_conn()?.req_packed_commands(cmd, offset, count)
    }

    fn get_db(&self) -> i64 {
        self.conn.as_ref().map_or(0, ConnectionLike::get_db)
    }

    fn check_connection(&mut self) -> bool {
        self.conn.as_mut().map_or(false, |c| c.check_connection())
    }

    fn is_open(&self) -> bool {
        self.conn.as_ref().map_or(false, |c| c.is_open())
    }
}

fn registry_path(dbdir: &Path, dbfilename: &str) -> PathBuf {
    dbdir.join(format!("{}.settings", dbfilename))
}

fn path_value(path: &Path) -> SettingValue {
    SettingValue::Single(path.display().to_string())
}

fn unix_client(socket: &Path) -> Result<redis::Client> {
    Ok(redis::Client::open(redis::ConnectionInfo {
        addr: redis::ConnectionAddr::Unix(socket.to_path_buf()),
        redis: redis::RedisConnectionInfo::default(),
    })?)
}

/// Count CLIENT LIST entries whose flags mark a normal or unix-socket
/// client.
fn count_normal_clients(listing: &str) -> usize {
    listing
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .find_map(|field| field.strip_prefix("flags="))
                .map(|flags| {
                    flags
                        .to_ascii_uppercase()
                        .chars()
                        .any(|c| c == 'U' || c == 'N')
                })
                .unwrap_or(false)
        })
        .count()
}
