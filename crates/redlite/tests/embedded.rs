//! End-to-end tests that launch a real redis-server.
//!
//! Every test is guarded: when no redis-server binary is installed the test
//! prints a notice and passes vacuously, so the suite stays runnable on
//! machines without the server.

use redis::Commands;
use redlite::process::is_process_alive;
use redlite::{Error, Redis};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn redis_server_available() -> bool {
    // Repeated init attempts are expected across tests; only the first wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    std::process::Command::new(redlite::process::default_executable())
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

macro_rules! require_redis_server {
    () => {
        if !redis_server_available() {
            eprintln!("redis-server not installed, skipping");
            return;
        }
    };
}

#[test]
fn test_set_get_round_trip() {
    require_redis_server!();

    let mut db = Redis::builder().open().unwrap();
    db.set::<_, _, ()>("key", "value").unwrap();
    let value: String = db.get("key").unwrap();
    assert_eq!(value, "value");

    assert!(db.pid() != 0);
    assert!(is_process_alive(db.pid()));

    db.close();
}

#[test]
fn test_instance_directory_removed_on_close() {
    require_redis_server!();

    let mut db = Redis::builder().open().unwrap();
    let redis_dir = db.redis_dir().unwrap().to_path_buf();
    let pid = db.pid();
    assert!(redis_dir.is_dir());

    db.close();

    assert!(!redis_dir.exists());
    assert!(!is_process_alive(pid));
}

#[test]
fn test_same_db_file_shares_one_server() {
    require_redis_server!();

    let temp_dir = TempDir::new().unwrap();
    let db_file = temp_dir.path().join("shared.db");

    let mut first = Redis::open(&db_file).unwrap();
    let mut second = Redis::open(&db_file).unwrap();

    // Both handles talk to the same server process.
    assert_eq!(first.pid(), second.pid());
    assert!(first.redis_dir().is_some());
    assert!(second.redis_dir().is_none());

    first.set::<_, _, ()>("shared", "yes").unwrap();
    let seen: String = second.get("shared").unwrap();
    assert_eq!(seen, "yes");

    // Releasing one handle leaves the server running for the other.
    let pid = first.pid();
    second.close();
    assert!(is_process_alive(pid));
    let still: String = first.get("shared").unwrap();
    assert_eq!(still, "yes");

    // The last handle takes the server down with it.
    first.close();
    assert!(!is_process_alive(pid));
}

#[test]
fn test_distinct_db_files_get_distinct_servers() {
    require_redis_server!();

    let temp_dir = TempDir::new().unwrap();
    let mut first = Redis::open(temp_dir.path().join("a.db")).unwrap();
    let mut second = Redis::open(temp_dir.path().join("b.db")).unwrap();

    // Different database files are different identities: each gets its own
    // server process and owns its own instance directory.
    assert_ne!(first.pid(), second.pid());
    assert!(first.redis_dir().is_some());
    assert!(second.redis_dir().is_some());
    assert_ne!(first.socket_path(), second.socket_path());

    first.set::<_, _, ()>("which", "a").unwrap();
    assert!(second.get::<_, Option<String>>("which").unwrap().is_none());

    second.close();
    first.close();
}

#[test]
fn test_persistence_across_restart() {
    require_redis_server!();

    let temp_dir = TempDir::new().unwrap();
    let db_file = temp_dir.path().join("persist.db");

    let mut db = Redis::open(&db_file).unwrap();
    db.set::<_, _, ()>("durable", "still here").unwrap();
    db.close();

    // Shutdown saved the dataset next to the database file; a fresh server
    // loads it back.
    assert!(db_file.is_file());

    let mut reopened = Redis::open(&db_file).unwrap();
    let value: String = reopened.get("durable").unwrap();
    assert_eq!(value, "still here");
    reopened.close();
}

#[test]
fn test_explicit_socket_path() {
    use std::os::unix::fs::FileTypeExt;

    require_redis_server!();

    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("pinned.sock");

    let mut db = Redis::builder().unix_socket_path(&socket).open().unwrap();

    assert_eq!(db.socket_path(), Some(socket.as_path()));
    let file_type = fs::symlink_metadata(&socket).unwrap().file_type();
    assert!(file_type.is_socket());

    db.close();
}

#[test]
fn test_db_path_reopens_same_instance() {
    require_redis_server!();

    let temp_dir = TempDir::new().unwrap();
    let mut first = Redis::open(temp_dir.path().join("named.db")).unwrap();

    // db_path() names the same identity the handle was opened on.
    let db_path = first.db_path().unwrap();
    assert_eq!(db_path, temp_dir.path().join("named.db"));

    let mut second = Redis::open(&db_path).unwrap();
    assert_eq!(first.pid(), second.pid());

    second.close();
    first.close();
}

#[test]
fn test_log_access() {
    require_redis_server!();

    let mut db = Redis::builder().open().unwrap();

    let contents = db.log_contents().unwrap();
    assert!(!contents.is_empty());

    let tailed = db.log_tail(4, 100).unwrap();
    assert!(tailed.len() <= 4);
    assert!(!tailed.is_empty());
    // The tail is a suffix of the full log.
    assert!(contents.lines().any(|line| line == tailed[0]));

    db.close();
}

#[test]
fn test_setting_override_reaches_server() {
    require_redis_server!();

    let mut db = Redis::builder()
        .setting("maxmemory", "16mb")
        .open()
        .unwrap();

    let reply: Vec<String> = redis::cmd("CONFIG")
        .arg("GET")
        .arg("maxmemory")
        .query(&mut db)
        .unwrap();
    assert_eq!(reply, vec!["maxmemory".to_string(), "16777216".to_string()]);

    db.close();
}

#[test]
fn test_bad_setting_fails_launch_with_log() {
    require_redis_server!();

    let err = Redis::builder()
        .setting("not-a-real-directive", "1")
        .start_timeout(Duration::from_secs(2))
        .open()
        .unwrap_err();

    assert!(err.is_start_error());
}

#[test]
fn test_unreachable_remote_is_connection_error() {
    // No server involved at all, so no guard needed.
    let err = Redis::builder()
        .remote("127.0.0.1", 1)
        .open()
        .unwrap_err();

    assert!(matches!(err, Error::Connection(_)));
    assert!(!err.is_start_error());
}

#[test]
fn test_close_is_idempotent_and_blocks_commands() {
    require_redis_server!();

    let mut db = Redis::builder().open().unwrap();
    db.close();
    db.close();

    let err = db.get::<_, String>("key").unwrap_err();
    assert_eq!(err.kind(), redis::ErrorKind::ClientError);
}

#[test]
fn test_drop_shuts_down_server() {
    require_redis_server!();

    let pid;
    {
        let db = Redis::builder().open().unwrap();
        pid = db.pid();
        assert!(is_process_alive(pid));
    }
    assert!(!is_process_alive(pid));
}
