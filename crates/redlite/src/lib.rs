//! redlite embeds a redis-server process inside the client library.
//!
//! Opening a handle on a database file transparently provisions a private
//! working directory, renders a server configuration, launches redis-server
//! on a Unix domain socket, and waits for it to answer. A second handle
//! opened on the same database file, from this process or another, discovers
//! the running instance through a small filesystem registry and attaches to
//! it instead of starting a duplicate. Closing the last handle shuts the
//! server down (asking it to save first) and removes the working directory.
//!
//! ```no_run
//! use redis::Commands;
//!
//! let mut db = redlite::Redis::open("/tmp/demo.db")?;
//! db.set::<_, _, ()>("key", "value")?;
//! let value: String = db.get("key")?;
//! # Ok::<(), redlite::Error>(())
//! ```
//!
//! Handles implement [`redis::ConnectionLike`], so anything written against
//! the `redis` crate's synchronous API works against an embedded server
//! unchanged. The [`RedisBuilder`] gives control over the database location,
//! socket path, server settings, start timeout, and the server binary; it
//! can also point the handle at an external server, in which case nothing is
//! launched.

pub mod config;
pub mod error;
pub mod instance;
pub mod logfile;
pub mod process;
pub mod registry;

mod handle;

pub use config::{default_settings, render, settings, SettingValue, Settings};
pub use error::{Error, Result};
pub use handle::{Redis, RedisBuilder};
pub use registry::{RegistryRecord, SettingsRegistry};

// Re-exported so callers get the command surface without naming the client
// crate themselves.
pub use redis::{Commands, ConnectionLike};
