use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CiPulseError, Result};

/// User-scoped view preferences, loaded on start and saved on every
/// change. Keyed by fixed field names so old files keep deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Preferences {
    pub show_stale: bool,
    pub show_notifications: bool,
    pub username_filter: Option<String>,
}

/// Storage access for preference state, isolated behind a trait so tests
/// can swap in an in-memory store.
pub trait PreferenceStore: Send + Sync {
    /// Loads stored preferences, falling back to defaults when nothing is
    /// stored or the stored file is unreadable.
    fn load(&self) -> Preferences;

    fn save(&self, prefs: &Preferences) -> Result<()>;
}

/// File-backed store under the platform config directory
/// (`~/.config/cipulse/prefs.json` on Linux).
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| CiPulseError::Config("No config directory found".into()))?
            .join("cipulse");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("prefs.json"),
        })
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Preferences {
        if !self.path.exists() {
            return Preferences::default();
        }
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .inspect(|_| debug!("Loaded preferences from: {}", self.path.display()))
            .unwrap_or_else(|| {
                warn!("Failed to load preferences, starting with defaults");
                Preferences::default()
            })
    }

    fn save(&self, prefs: &Preferences) -> Result<()> {
        let contents = serde_json::to_string_pretty(prefs)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

/// In-memory store for tests and one-shot subcommands.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    inner: Mutex<Preferences>,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Preferences {
        self.inner.lock().expect("preference lock poisoned").clone()
    }

    fn save(&self, prefs: &Preferences) -> Result<()> {
        *self.inner.lock().expect("preference lock poisoned") = prefs.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferenceStore::at(dir.path().join("prefs.json"));

        let prefs = Preferences {
            show_stale: true,
            show_notifications: false,
            username_filter: Some("dev".to_string()),
        };
        store.save(&prefs).unwrap();

        assert_eq!(store.load(), prefs);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferenceStore::at(dir.path().join("absent.json"));
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FilePreferenceStore::at(path);
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryPreferenceStore::default();
        let prefs = Preferences {
            show_notifications: true,
            ..Preferences::default()
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load(), prefs);
    }
}
