//! Logging setup and per-area log targets
//!
//! The library only talks to the `log` facade. Each subsystem logs under its
//! own target so one area can be turned up without the rest:
//!
//! ```text
//! RUST_LOG=info,tessera::surfaces=debug tessera --clients 2
//! ```
//!
//! The binary installs `env_logger` through [`init`]. `RUST_LOG`, when set,
//! always wins over the configured level.

use serde::{Deserialize, Serialize};

pub const SURFACES: &str = "tessera::surfaces";
pub const SESSIONS: &str = "tessera::sessions";
pub const SCREENS: &str = "tessera::screens";
pub const POLICY: &str = "tessera::policy";
pub const INPUT: &str = "tessera::input";
pub const KEYMAP: &str = "tessera::keymap";

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// `[logging]` configuration section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

impl LogConfig {
    /// Level actually used, honouring a `--debug` override
    pub fn effective_level(&self, force_debug: bool) -> LogLevel {
        if force_debug && self.level > LogLevel::Debug {
            LogLevel::Debug
        } else {
            self.level
        }
    }
}

/// Installs the global logger. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: &LogConfig, force_debug: bool) {
    let level = config.effective_level(force_debug);
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_filter()))
        .format_timestamp_millis()
        .try_init();
}
