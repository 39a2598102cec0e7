//! Redis server configuration generation.
//!
//! A configuration is a map from setting name to [`SettingValue`], seeded
//! from [`default_settings`] and overlaid with caller overrides. [`render`]
//! turns the map into the `key value` line format redis-server reads.
//! Both functions are pure: they never mutate their inputs.

use std::collections::BTreeMap;

/// Value of a single server setting.
///
/// Settings are heterogeneous: most are a single token, a few (like the
/// `save` snapshot schedule) are legitimately repeatable, and callers must
/// be able to suppress a default outright rather than merely replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    /// A single `key value` line.
    Single(String),
    /// The setting is emitted once per element, in order.
    Many(Vec<String>),
    /// Removes the setting from the effective set.
    Unset,
}

impl SettingValue {
    /// True when rendering this value would produce no output.
    pub fn is_empty(&self) -> bool {
        match self {
            SettingValue::Single(v) => v.is_empty(),
            SettingValue::Many(vs) => vs.is_empty(),
            SettingValue::Unset => true,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Single(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Single(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(values: Vec<String>) -> Self {
        SettingValue::Many(values)
    }
}

impl From<&[&str]> for SettingValue {
    fn from(values: &[&str]) -> Self {
        SettingValue::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// An effective set of server settings, ordered by key.
pub type Settings = BTreeMap<String, SettingValue>;

/// Settings whose values are paths or filenames and are rendered as quoted
/// literals. `dbdir` is included because it renders as the `dir` setting.
const QUOTED_KEYS: &[&str] = &[
    "appendfilename",
    "dbdir",
    "dbfilename",
    "dir",
    "logfile",
    "pidfile",
    "unixsocket",
];

/// The default server settings: an embedded, socket-only, daemonizing
/// instance with periodic snapshots.
pub fn default_settings() -> Settings {
    let mut defaults = Settings::new();
    let singles: &[(&str, &str)] = &[
        ("activerehashing", "yes"),
        ("aof-load-truncated", "yes"),
        ("aof-rewrite-incremental-fsync", "yes"),
        ("appendfilename", "appendonly.aof"),
        ("appendfsync", "everysec"),
        ("appendonly", "no"),
        ("auto-aof-rewrite-min-size", "64mb"),
        ("auto-aof-rewrite-percentage", "100"),
        ("daemonize", "yes"),
        ("databases", "16"),
        ("dbdir", "./"),
        ("dbfilename", "redis.db"),
        ("hash-max-ziplist-entries", "512"),
        ("hash-max-ziplist-value", "64"),
        ("hll-sparse-max-bytes", "3000"),
        ("hz", "10"),
        ("latency-monitor-threshold", "0"),
        ("list-max-ziplist-size", "128"),
        ("logfile", "redis.log"),
        ("loglevel", "notice"),
        ("lua-time-limit", "5000"),
        ("no-appendfsync-on-rewrite", "no"),
        ("notify-keyspace-events", "\"\""),
        ("pidfile", "/var/run/redlite/redis.pid"),
        ("port", "0"),
        ("rdbchecksum", "yes"),
        ("rdbcompression", "yes"),
        ("repl-disable-tcp-nodelay", "no"),
        ("set-max-intset-entries", "512"),
        ("slave-priority", "100"),
        ("slave-read-only", "yes"),
        ("slave-serve-stale-data", "yes"),
        ("slowlog-log-slower-than", "10000"),
        ("slowlog-max-len", "128"),
        ("stop-writes-on-bgsave-error", "yes"),
        ("tcp-backlog", "511"),
        ("tcp-keepalive", "0"),
        ("timeout", "0"),
        ("unixsocket", "/var/run/redlite/redis.socket"),
        ("unixsocketperm", "700"),
        ("zset-max-ziplist-entries", "128"),
        ("zset-max-ziplist-value", "64"),
    ];
    for (key, value) in singles {
        defaults.insert(key.to_string(), SettingValue::Single(value.to_string()));
    }
    defaults.insert(
        "save".to_string(),
        SettingValue::Many(
            ["900 1", "300 100", "60 200", "15 1000"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        ),
    );
    defaults
}

/// Merge caller overrides over the defaults.
///
/// An [`SettingValue::Unset`] override removes the key from the effective
/// set entirely, letting a caller suppress a default. Neither the defaults
/// nor the override map are mutated.
pub fn settings(overrides: &Settings) -> Settings {
    let mut merged = default_settings();
    for (key, value) in overrides {
        match value {
            SettingValue::Unset => {
                merged.remove(key);
            }
            other => {
                merged.insert(key.clone(), other.clone());
            }
        }
    }
    merged
}

/// Render an effective settings map as redis-server configuration text.
///
/// Keys are emitted in lexicographic order so the output is deterministic.
/// The `dbdir` key renders as redis-server's actual `dir` setting. Path-like
/// values are quoted; empty values are dropped entirely.
pub fn render(settings: &Settings) -> String {
    let mut lines = BTreeMap::new();
    for (key, value) in settings {
        if value.is_empty() {
            continue;
        }
        let key = if key == "dbdir" { "dir" } else { key.as_str() };
        lines.insert(key.to_string(), value.clone());
    }

    let mut rendered = String::new();
    for (key, value) in &lines {
        match value {
            SettingValue::Single(v) => {
                rendered.push_str(&format_line(key, v));
            }
            SettingValue::Many(vs) => {
                for v in vs {
                    rendered.push_str(&format_line(key, v));
                }
            }
            SettingValue::Unset => {}
        }
    }
    rendered
}

fn format_line(key: &str, value: &str) -> String {
    if QUOTED_KEYS.contains(&key) {
        format!("{} {}\n", key, quote(value))
    } else {
        format!("{} {}\n", key, value)
    }
}

/// Quote a path-like value so redis-server reads it as a single literal.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
