//! Escalating termination of the server process.
//!
//! The ladder is deliberate and user-visible: SIGTERM, a bounded liveness
//! poll, then SIGKILL. The daemonized server is not our child, so there is
//! nothing to reap; init collects it.

use super::liveness::is_process_alive;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll until `pid` exits or the timeout elapses. True when the process is
/// gone.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        sleep(POLL_INTERVAL);
    }
    !is_process_alive(pid)
}

/// SIGTERM, bounded wait, then SIGKILL if still alive.
///
/// Returns true when the process is gone afterwards. A process that is
/// already dead counts as success.
pub fn terminate(pid: u32, timeout: Duration) -> bool {
    if !is_process_alive(pid) {
        return true;
    }

    debug!("sending SIGTERM to pid {}", pid);
    if let Err(e) = signal(pid, Signal::SIGTERM) {
        if e == Errno::ESRCH {
            return true;
        }
        warn!("failed to send SIGTERM to pid {}: {}", pid, e);
    }

    if wait_for_exit(pid, timeout) {
        debug!("pid {} exited after SIGTERM", pid);
        return true;
    }

    debug!("pid {} still running, sending SIGKILL", pid);
    kill_now(pid);
    wait_for_exit(pid, Duration::from_millis(500))
}

/// Unconditional SIGKILL. Used against stale pid-file processes the primary
/// pid did not track.
pub fn kill_now(pid: u32) {
    if pid == 0 {
        return;
    }
    if let Err(e) = signal(pid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!("failed to SIGKILL pid {}: {}", pid, e);
        }
    }
}

/// Signal a single process, never a process group: a pid outside the
/// kernel's range reports ESRCH instead of being cast to a negative pgid.
fn signal(pid: u32, sig: Signal) -> std::result::Result<(), Errno> {
    match i32::try_from(pid) {
        Ok(pid) if pid > 0 => kill(Pid::from_raw(pid), sig),
        _ => Err(Errno::ESRCH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_nonexistent() {
        assert!(terminate(4_000_000_000, Duration::from_millis(200)));
    }

    #[test]
    fn test_wait_for_exit_dead_pid() {
        assert!(wait_for_exit(4_000_000_000, Duration::from_millis(200)));
    }

    #[test]
    fn test_wait_for_exit_times_out_on_live_pid() {
        // Our own process will not exit while we poll it.
        assert!(!wait_for_exit(std::process::id(), Duration::from_millis(300)));
    }

    #[test]
    fn test_kill_now_nonexistent_is_noop() {
        kill_now(4_000_000_000);
        kill_now(0);
    }
}
