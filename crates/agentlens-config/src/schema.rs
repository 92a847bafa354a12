// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Log verbosity, mapped to a [`tracing_subscriber::EnvFilter`] directive at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    /// The directive string passed to `EnvFilter::new`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub forensic_capture: bool,
}

/// The observability core's full recognized configuration surface.
///
/// Every field here corresponds directly to a key in §6's configuration
/// table; nothing else is read from the merged YAML document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat gateway endpoint. A trailing slash is stripped
    /// on load so callers can join paths with a plain `format!("{endpoint}/…")`.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Hard-coded inference defaults.
///
/// Not user-configurable: the host's gateway owns real sampling
/// parameters, these only describe what this core assumes when estimating
/// token budgets and constructing diagnostic dumps.
pub const TEMPERATURE: f32 = 0.1;
pub const TOP_P: f32 = 1.0;
pub const MAX_OUTPUT_TOKENS: u32 = 16_384;
pub const TIMEOUT_MS: u64 = 60_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_level_is_info() {
        assert_eq!(LoggingConfig::default().level, LogLevel::Info);
    }

    #[test]
    fn config_deserializes_from_partial_yaml() {
        let cfg: Config = serde_yaml::from_str("endpoint: https://gw.example.com").unwrap();
        assert_eq!(cfg.endpoint, "https://gw.example.com");
        assert_eq!(cfg.models.default, "");
        assert_eq!(cfg.logging.level, LogLevel::Info);
    }

    #[test]
    fn config_deserializes_full_document() {
        let yaml = "\
endpoint: https://gw.example.com/\n\
models:\n  default: gpt-4o\n\
logging:\n  level: debug\n\
debug:\n  forensic_capture: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.models.default, "gpt-4o");
        assert_eq!(cfg.logging.level, LogLevel::Debug);
        assert!(cfg.debug.forensic_capture);
    }
}
