//! Pid-file liveness probing.
//!
//! [`pid_from_file`] is the single source of truth used by both the registry
//! and the supervisor to decide whether a previously recorded instance is
//! real. A pid file naming a process the OS no longer has is treated as "not
//! running", never as an error.

use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// Sends signal 0, which performs the existence check without delivering
/// anything.
pub fn is_process_alive(pid: u32) -> bool {
    // A pid of 0 (or one the kernel could never hand out) must not reach
    // kill(), where it would address a process group instead.
    match i32::try_from(pid) {
        Ok(pid) if pid > 0 => kill(Pid::from_raw(pid), None).is_ok(),
        _ => false,
    }
}

/// Read a pid file and return the recorded pid, or 0.
///
/// Returns 0 when the file is missing, unparseable, records pid 0, or the
/// recorded process is no longer alive.
pub fn pid_from_file(pidfile: &Path) -> u32 {
    let raw = match fs::read_to_string(pidfile) {
        Ok(raw) => raw,
        Err(_) => return 0,
    };
    let pid = match raw.trim().parse::<u32>() {
        Ok(pid) => pid,
        Err(_) => {
            debug!("pid file {} has unparseable content", pidfile.display());
            return 0;
        }
    };
    if is_process_alive(pid) {
        pid
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(4_000_000_000));
        assert!(!is_process_alive(0));
    }

    #[test]
    fn test_pid_from_file_missing() {
        assert_eq!(pid_from_file(Path::new("/nonexistent/redis.pid")), 0);
    }

    #[test]
    fn test_pid_from_file_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let pidfile = temp_dir.path().join("redis.pid");
        fs::write(&pidfile, "not a pid\n").unwrap();

        assert_eq!(pid_from_file(&pidfile), 0);
    }

    #[test]
    fn test_pid_from_file_zero() {
        let temp_dir = TempDir::new().unwrap();
        let pidfile = temp_dir.path().join("redis.pid");
        fs::write(&pidfile, "0\n").unwrap();

        assert_eq!(pid_from_file(&pidfile), 0);
    }

    #[test]
    fn test_pid_from_file_dead_process() {
        let temp_dir = TempDir::new().unwrap();
        let pidfile = temp_dir.path().join("redis.pid");
        fs::write(&pidfile, "4000000000\n").unwrap();

        assert_eq!(pid_from_file(&pidfile), 0);
    }

    #[test]
    fn test_pid_from_file_live_process() {
        let temp_dir = TempDir::new().unwrap();
        let pidfile = temp_dir.path().join("redis.pid");
        let own = std::process::id();
        fs::write(&pidfile, format!("{}\n", own)).unwrap();

        assert_eq!(pid_from_file(&pidfile), own);
    }
}
