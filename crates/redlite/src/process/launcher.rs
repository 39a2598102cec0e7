//! Launching the redis-server process and waiting for readiness.
//!
//! The server is started as `<executable> <config-file>` with `daemonize
//! yes`, so the spawned process forks the real server and exits; a nonzero
//! exit status means the configuration or the launch itself failed. After a
//! successful launch the readiness gate has two stages: the socket file must
//! appear, then the server must answer a PING (tolerating the transient
//! "still loading the dataset" reply).

use crate::error::{Error, Result};
use crate::instance::InstanceDirs;
use crate::logfile;
use crate::process::liveness;
use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default ceiling for every launch/readiness wait loop.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment variable naming the redis-server binary to run.
pub const EXECUTABLE_ENV: &str = "REDLITE_REDIS_SERVER";

/// Resolve the server executable: env override, else `redis-server` on PATH.
pub fn default_executable() -> String {
    env::var(EXECUTABLE_ENV).unwrap_or_else(|_| "redis-server".to_string())
}

/// Write the rendered configuration, start the server, and wait for its
/// socket to appear. Returns the daemon pid recorded in the pid file.
pub fn launch(
    dirs: &InstanceDirs,
    config_text: &str,
    executable: &str,
    timeout: Duration,
) -> Result<u32> {
    fs::write(&dirs.config_path, config_text)
        .map_err(|e| Error::io_with_path(e, &dirs.config_path))?;

    debug!("running: {} {}", executable, dirs.config_path.display());
    let status = Command::new(executable)
        .arg(&dirs.config_path)
        .status()
        .map_err(|e| Error::LaunchFailed {
            message: format!("failed to run {}: {}", executable, e),
            log: None,
        })?;

    if !status.success() {
        return Err(Error::LaunchFailed {
            message: format!("{} exited with {}", executable, status),
            log: log_excerpt(&dirs.logfile),
        });
    }

    wait_for_socket(&dirs.socket_path, &dirs.logfile, timeout)?;

    let pid = liveness::pid_from_file(&dirs.pidfile);
    info!(
        "started redis-server pid {} on socket {}",
        pid,
        dirs.socket_path.display()
    );
    Ok(pid)
}

/// Poll for the Unix socket file to appear.
fn wait_for_socket(socket_path: &Path, logfile: &Path, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if socket_path.exists() {
            return Ok(());
        }
        sleep(POLL_INTERVAL);
    }
    if socket_path.exists() {
        return Ok(());
    }
    Err(Error::StartTimeout {
        what: "redis-server socket did not appear",
        timeout,
        log: log_excerpt(logfile),
    })
}

/// Connect and apply the liveness probe, retrying transient failures.
///
/// The probe tolerates `BusyLoadingError` (server up but still loading its
/// dataset) and connection-level failures until the deadline; any other
/// error is surfaced immediately. Applied to freshly launched instances and
/// to instances attached via the registry alike.
pub fn connect_ready(
    client: &redis::Client,
    timeout: Duration,
    logfile: Option<&Path>,
) -> Result<redis::Connection> {
    let deadline = Instant::now() + timeout;
    loop {
        let transient = match client.get_connection() {
            Ok(mut conn) => match redis::cmd("PING").query::<String>(&mut conn) {
                Ok(_) => return Ok(conn),
                Err(e) if is_transient(&e) => e,
                Err(e) => return Err(e.into()),
            },
            Err(e) if is_transient(&e) => e,
            Err(e) => return Err(e.into()),
        };

        if Instant::now() >= deadline {
            debug!("readiness probe gave up: {}", transient);
            return Err(Error::StartTimeout {
                what: "redis-server did not answer PING",
                timeout,
                log: logfile.and_then(|p| log_excerpt(p)),
            });
        }
        debug!("server not ready yet ({}), retrying", transient);
        sleep(POLL_INTERVAL);
    }
}

fn is_transient(err: &redis::RedisError) -> bool {
    matches!(
        err.kind(),
        redis::ErrorKind::BusyLoadingError | redis::ErrorKind::IoError
    )
}

/// Last few log lines, attached to launch errors for diagnosis.
fn log_excerpt(logfile: &Path) -> Option<String> {
    logfile::tail(logfile, 20, 120).ok().map(|l| l.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_executable_fallback() {
        // Only meaningful when the env override is not set in the test
        // environment.
        if env::var(EXECUTABLE_ENV).is_err() {
            assert_eq!(default_executable(), "redis-server");
        }
    }

    #[test]
    fn test_launch_missing_executable() {
        let dirs = InstanceDirs::provision(None).unwrap();
        let err = launch(
            &dirs,
            "daemonize yes\n",
            "/nonexistent/redis-server",
            Duration::from_millis(200),
        )
        .unwrap_err();

        assert!(matches!(err, Error::LaunchFailed { .. }));
        // The config was still written before the spawn attempt.
        assert!(dirs.config_path.exists());

        fs::remove_dir_all(&dirs.redis_dir).unwrap();
    }

    #[test]
    fn test_wait_for_socket_timeout() {
        let dirs = InstanceDirs::provision(None).unwrap();
        let err = wait_for_socket(
            &dirs.socket_path,
            &dirs.logfile,
            Duration::from_millis(200),
        )
        .unwrap_err();

        assert!(matches!(err, Error::StartTimeout { .. }));

        fs::remove_dir_all(&dirs.redis_dir).unwrap();
    }
}
