//! Application-level configuration loading for the sync tuning knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/pawlive.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PAWLIVE_CONFIG_PATH";

const DEFAULT_MESSAGE_WINDOW: usize = 100;
const DEFAULT_CONNECT_RETRY_INITIAL_MS: u64 = 1_000;
const DEFAULT_CONNECT_RETRY_MAX_MS: u64 = 10_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the client.
pub struct AppConfig {
    message_window: usize,
    connect_retry_initial: Duration,
    connect_retry_max: Duration,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded sync tuning from config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Bounded size of the chat message window subscription.
    pub fn message_window(&self) -> usize {
        self.message_window
    }

    /// Initial backoff delay for store connection attempts.
    pub fn connect_retry_initial(&self) -> Duration {
        self.connect_retry_initial
    }

    /// Backoff ceiling for store connection attempts.
    pub fn connect_retry_max(&self) -> Duration {
        self.connect_retry_max
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            message_window: DEFAULT_MESSAGE_WINDOW,
            connect_retry_initial: Duration::from_millis(DEFAULT_CONNECT_RETRY_INITIAL_MS),
            connect_retry_max: Duration::from_millis(DEFAULT_CONNECT_RETRY_MAX_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file.
struct RawConfig {
    #[serde(default)]
    message_window: Option<usize>,
    #[serde(default)]
    connect_retry_initial_ms: Option<u64>,
    #[serde(default)]
    connect_retry_max_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            message_window: raw.message_window.unwrap_or(defaults.message_window),
            connect_retry_initial: raw
                .connect_retry_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_retry_initial),
            connect_retry_max: raw
                .connect_retry_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_retry_max),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_fills_missing_fields_from_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"message_window": 25}"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.message_window(), 25);
        assert_eq!(
            config.connect_retry_initial(),
            Duration::from_millis(DEFAULT_CONNECT_RETRY_INITIAL_MS)
        );
    }
}
