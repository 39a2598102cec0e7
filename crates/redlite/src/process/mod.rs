//! Process control for the embedded server: launch, liveness, termination.

pub mod launcher;
pub mod liveness;
pub mod shutdown;

pub use launcher::{connect_ready, default_executable, launch, DEFAULT_START_TIMEOUT};
pub use liveness::{is_process_alive, pid_from_file};
pub use shutdown::{kill_now, terminate, wait_for_exit};
