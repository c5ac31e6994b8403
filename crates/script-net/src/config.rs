//! Network configuration
//!
//! Settings are read from a `ConfigStore` on every call, so a change is
//! picked up by the next request without restarting anything.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

pub const BASE_URL: &str = "net.base_url";
pub const API_TOKEN: &str = "net.api_token";
pub const CONNECT_TIMEOUT_MS: &str = "net.connect_timeout_ms";
pub const READ_TIMEOUT_MS: &str = "net.read_timeout_ms";
pub const WRITE_TIMEOUT_MS: &str = "net.write_timeout_ms";
pub const WEBSOCKET_CALL_TIMEOUT_MS: &str = "net.websocket_call_timeout_ms";
pub const LOG_LEVEL: &str = "net.log_level";

const DEFAULT_IO_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WEBSOCKET_CALL_TIMEOUT_MS: u64 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Config Store
// ─────────────────────────────────────────────────────────────────────────────

/// Source of string and integer settings
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn get_long(&self, key: &str) -> Option<i64> {
        self.get_string(key).and_then(|v| v.trim().parse().ok())
    }
}

/// In-memory, thread-safe preferences
#[derive(Debug, Default)]
pub struct Preferences {
    values: RwLock<HashMap<String, String>>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl ToString) {
        self.values.write().insert(key.into(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }

    /// Load a TOML table; nested tables become dotted keys
    pub fn load_toml(&self, table: &toml::Table) {
        let mut values = self.values.write();
        flatten_toml("", table, &mut values);
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let table: toml::Table = text.parse()?;
        let prefs = Self::new();
        prefs.load_toml(&table);
        Ok(prefs)
    }
}

fn flatten_toml(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten_toml(&full_key, inner, out),
            toml::Value::String(s) => {
                out.insert(full_key, s.clone());
            }
            other => {
                out.insert(full_key, other.to_string());
            }
        }
    }
}

impl ConfigStore for Preferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Level
// ─────────────────────────────────────────────────────────────────────────────

/// How much request/response traffic is mirrored to the log sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum HttpLogLevel {
    #[default]
    None,
    /// Request and response lines
    Basic,
    /// Plus headers
    Headers,
    /// Plus bodies
    Body,
}

impl FromStr for HttpLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(HttpLogLevel::None),
            "BASIC" => Ok(HttpLogLevel::Basic),
            "HEADERS" => Ok(HttpLogLevel::Headers),
            "BODY" => Ok(HttpLogLevel::Body),
            other => Err(format!("unknown log level {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for one network call
#[derive(Debug, Clone, PartialEq)]
pub struct NetSettings {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub websocket_call_timeout: Duration,
    pub log_level: HttpLogLevel,
}

impl NetSettings {
    pub fn read(store: &dyn ConfigStore) -> Self {
        let millis = |key: &str, default: u64| {
            let ms = store
                .get_long(key)
                .and_then(|v| u64::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(default);
            Duration::from_millis(ms)
        };
        let non_empty = |key: &str| store.get_string(key).filter(|v| !v.trim().is_empty());

        let log_level = store
            .get_string(LOG_LEVEL)
            .map(|raw| {
                raw.parse().unwrap_or_else(|e: String| {
                    tracing::warn!(error = %e, "Ignoring invalid {}", LOG_LEVEL);
                    HttpLogLevel::None
                })
            })
            .unwrap_or_default();

        Self {
            base_url: non_empty(BASE_URL),
            api_token: non_empty(API_TOKEN),
            connect_timeout: millis(CONNECT_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS),
            read_timeout: millis(READ_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS),
            write_timeout: millis(WRITE_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS),
            websocket_call_timeout: millis(
                WEBSOCKET_CALL_TIMEOUT_MS,
                DEFAULT_WEBSOCKET_CALL_TIMEOUT_MS,
            ),
            log_level,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
