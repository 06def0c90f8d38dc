//! Locally persisted participant state, the device-scoped marker that
//! survives process restarts: the durable identity and, once entry has
//! succeeded, the display name that lets a returning participant skip the
//! entry gate.

use std::{env, fs, io, io::ErrorKind, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default location on disk for the participant marker file.
const DEFAULT_STATE_PATH: &str = ".pawlive/participant.json";
/// Environment variable that overrides [`DEFAULT_STATE_PATH`].
const STATE_PATH_ENV: &str = "PAWLIVE_STATE_PATH";

/// Durable `{participant_id, full_name}` marker. Both fields present means
/// the participant has completed the entry gate on this device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantMarker {
    /// Stable participant identity minted by the identity resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Display name registered through the session gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl ParticipantMarker {
    /// Whether this marker records a completed entry.
    pub fn is_entered(&self) -> bool {
        self.participant_id.is_some() && self.full_name.is_some()
    }
}

/// File-backed store for the participant marker. Init-once/read-many; only
/// this client's own actions mutate it.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    /// Resolve the marker path, taking the environment override into account.
    pub fn from_env() -> Self {
        let path = env::var_os(STATE_PATH_ENV)
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));
        Self { path }
    }

    /// Use an explicit marker path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the marker, treating a missing or unreadable file as empty.
    pub fn load(&self) -> ParticipantMarker {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(marker) => marker,
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "failed to parse participant marker; starting fresh"
                    );
                    ParticipantMarker::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => ParticipantMarker::default(),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read participant marker; starting fresh"
                );
                ParticipantMarker::default()
            }
        }
    }

    /// Persist the marker, creating parent directories as needed.
    pub fn save(&self, marker: &ParticipantMarker) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(marker)?;
        fs::write(&self.path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> LocalStore {
        let mut path = std::env::temp_dir();
        path.push(format!("pawlive-test-{}-{name}.json", std::process::id()));
        let _ = fs::remove_file(&path);
        LocalStore::at(path)
    }

    #[test]
    fn missing_file_loads_empty_marker() {
        let store = temp_store("missing");
        assert_eq!(store.load(), ParticipantMarker::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = temp_store("roundtrip");
        let marker = ParticipantMarker {
            participant_id: Some("u1".into()),
            full_name: Some("Ada".into()),
        };
        store.save(&marker).unwrap();
        assert_eq!(store.load(), marker);
        assert!(store.load().is_entered());
    }

    #[test]
    fn identity_alone_is_not_entered() {
        let marker = ParticipantMarker {
            participant_id: Some("u1".into()),
            full_name: None,
        };
        assert!(!marker.is_entered());
    }
}
