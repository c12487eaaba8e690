//! # Runtime Configuration Module
//!
//! Runtime behaviour of the streaming runtime is controlled by [`RuntimeConfig`],
//! loaded from environment variables, from a YAML file, or both (file first,
//! environment on top).
//!
//! ## Environment Variables
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `BRRTS_STACK_SIZE` | coroutine stack size, decimal or `0x` hex | `0x10000` |
//! | `BRRTS_ABORT_DELAY_MS` | how long a document or data stream may wait on deferred values | `5000` |
//! | `BRRTS_SERVER_MODE` | `development`, `production` or `test` | `production` |
//! | `BRRTS_RESPONSE_MODE` | `router` (re-throw caught responses) or `legacy` (return them) | `router` |
//!
//! ## YAML
//!
//! ```yaml
//! stack_size: 0x8000
//! abort_delay_ms: 2500
//! server_mode: development
//! response_mode: legacy
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use brrtstream::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("abort after {:?}", config.abort_delay);
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_ABORT_DELAY_MS: u64 = 5000;

/// Whether error details may leave the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Development,
    #[default]
    Production,
    Test,
}

impl ServerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    /// Only development builds expose internal error messages and stacks.
    #[must_use]
    pub fn exposes_internals(self) -> bool {
        self == Self::Development
    }
}

/// How a non-redirect response thrown from a loader or action propagates.
///
/// Two generations of the client router disagree here, so the behaviour is a
/// policy switch rather than a detected capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// The tagged response is returned as if the handler had returned it.
    Legacy,
    /// The tagged response is re-thrown to the caller.
    #[default]
    Router,
}

impl ResponseMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Some(Self::Legacy),
            "router" | "router-integrated" => Some(Self::Router),
            _ => None,
        }
    }
}

/// Runtime configuration for the coroutine runtime and the streaming layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes
    pub stack_size: usize,
    /// Upper bound on how long a stream waits for its shell and deferred values
    pub abort_delay: Duration,
    pub server_mode: ServerMode,
    pub response_mode: ResponseMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            abort_delay: Duration::from_millis(DEFAULT_ABORT_DELAY_MS),
            server_mode: ServerMode::default(),
            response_mode: ResponseMode::default(),
        }
    }
}

/// On-disk shape; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    stack_size: Option<StackSize>,
    abort_delay_ms: Option<u64>,
    server_mode: Option<ServerMode>,
    response_mode: Option<ResponseMode>,
}

/// Accepts `32768`, `"32768"` or `"0x8000"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StackSize {
    Number(usize),
    Text(String),
}

impl RuntimeConfig {
    /// Load configuration from environment variables on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a YAML document. Unknown keys are rejected.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document is null, which a struct will not accept.
        let file: FileConfig = match serde_yaml::from_str::<serde_yaml::Value>(yaml)
            .map_err(ConfigError::Yaml)?
        {
            serde_yaml::Value::Null => FileConfig::default(),
            value => serde_yaml::from_value(value).map_err(ConfigError::Yaml)?,
        };
        let mut config = Self::default();
        if let Some(size) = file.stack_size {
            config.stack_size = match size {
                StackSize::Number(n) => n,
                StackSize::Text(s) => parse_size(&s).ok_or(ConfigError::InvalidValue {
                    key: "stack_size",
                    value: s,
                })?,
            };
        }
        if let Some(ms) = file.abort_delay_ms {
            config.abort_delay = Duration::from_millis(ms);
        }
        if let Some(mode) = file.server_mode {
            config.server_mode = mode;
        }
        if let Some(mode) = file.response_mode {
            config.response_mode = mode;
        }
        Ok(config)
    }

    /// Read a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Apply `BRRTS_*` variables. Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = env::var("BRRTS_STACK_SIZE") {
            match parse_size(&val) {
                Some(size) => self.stack_size = size,
                None => tracing::warn!(value = %val, "Ignoring invalid BRRTS_STACK_SIZE"),
            }
        }
        if let Ok(val) = env::var("BRRTS_ABORT_DELAY_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) => self.abort_delay = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid BRRTS_ABORT_DELAY_MS"),
            }
        }
        if let Ok(val) = env::var("BRRTS_SERVER_MODE") {
            match ServerMode::parse(&val) {
                Some(mode) => self.server_mode = mode,
                None => tracing::warn!(value = %val, "Ignoring invalid BRRTS_SERVER_MODE"),
            }
        }
        if let Ok(val) = env::var("BRRTS_RESPONSE_MODE") {
            match ResponseMode::parse(&val) {
                Some(mode) => self.response_mode = mode,
                None => tracing::warn!(value = %val, "Ignoring invalid BRRTS_RESPONSE_MODE"),
            }
        }
        self
    }
}

fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.stack_size, 0x10000);
        assert_eq!(config.abort_delay, Duration::from_millis(5000));
        assert_eq!(config.server_mode, ServerMode::Production);
        assert_eq!(config.response_mode, ResponseMode::Router);
    }

    #[test]
    fn yaml_accepts_hex_stack_size() {
        let config = RuntimeConfig::from_yaml_str(
            "stack_size: \"0x8000\"\nabort_delay_ms: 250\nserver_mode: development\nresponse_mode: legacy\n",
        )
        .unwrap();
        assert_eq!(config.stack_size, 0x8000);
        assert_eq!(config.abort_delay, Duration::from_millis(250));
        assert_eq!(config.server_mode, ServerMode::Development);
        assert_eq!(config.response_mode, ResponseMode::Legacy);
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        let err = RuntimeConfig::from_yaml_str("abort_delay: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn yaml_rejects_bad_stack_size() {
        let err = RuntimeConfig::from_yaml_str("stack_size: \"huge\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "stack_size", .. }));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(ServerMode::parse("DEV"), Some(ServerMode::Development));
        assert_eq!(ServerMode::parse("nope"), None);
        assert_eq!(ResponseMode::parse("legacy"), Some(ResponseMode::Legacy));
        assert!(ServerMode::Development.exposes_internals());
        assert!(!ServerMode::Test.exposes_internals());
    }
}
