//! Storage settings handed to the factory at construction time.

use std::path::PathBuf;

use serde::Deserialize;

use crate::StorageType;

pub const DEFAULT_FILENAME: &str = "deathchests.db";
pub const DEFAULT_EXPIRE_MINUTES: i64 = 60;

const MILLIS_PER_MINUTE: i64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    pub data_dir: PathBuf,
    pub filename: String,
    pub database_url: Option<String>,
    pub debug: bool,
    /// Chest lifetime in minutes. Zero or less disables expiration.
    pub expire_time: i64,
    #[serde(flatten)]
    pub worlds: WorldSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            data_dir: PathBuf::from("."),
            filename: DEFAULT_FILENAME.to_string(),
            database_url: None,
            debug: false,
            expire_time: DEFAULT_EXPIRE_MINUTES,
            worlds: WorldSettings::default(),
        }
    }
}

impl StorageConfig {
    /// Path of the SQLite file.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(&self.filename)
    }

    /// Expiration instant for a chest placed at `now_ms`.
    pub fn expiration_from(&self, now_ms: i64) -> i64 {
        if self.expire_time <= 0 {
            return i64::MAX;
        }
        now_ms.saturating_add(self.expire_time.saturating_mul(MILLIS_PER_MINUTE))
    }
}

/// `enabled-worlds` / `disabled-worlds` from the host config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorldSettings {
    pub enabled_worlds: Vec<String>,
    pub disabled_worlds: Vec<String>,
}

impl WorldSettings {
    /// Worlds where death chests are placed.
    ///
    /// An empty enabled list means every loaded world.
    pub fn enabled_worlds(&self, loaded: &[String]) -> Vec<String> {
        let base = if self.enabled_worlds.is_empty() {
            loaded
        } else {
            &self.enabled_worlds
        };
        base.iter()
            .filter(|w| !self.disabled_worlds.contains(w))
            .cloned()
            .collect()
    }
}
