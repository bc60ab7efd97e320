use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod identity;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod sqlite;
pub mod world;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StorageConfig, WorldSettings};
pub use error::{BackendError, IdentityError, StorageError, StorageResult};
pub use factory::{DataStoreFactory, migrate};
pub use memory::MemoryDataStore;
pub use postgres::PostgresDataStore;
pub use record::{BlockPos, DeathChestRecord};
pub use sqlite::SqliteDataStore;
pub use world::{AnyWorld, KnownWorlds, WorldResolver};

use crate::record::StoredRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

impl StorageType {
    pub fn name(self) -> &'static str {
        match self {
            StorageType::Sqlite => "SQLite",
            StorageType::Postgres => "PostgreSQL",
            StorageType::Memory => "Memory",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StorageType::Sqlite),
            "postgres" | "postgresql" => Ok(StorageType::Postgres),
            "memory" | "mem" => Ok(StorageType::Memory),
            other => Err(StorageError::Config(format!("unknown storage type '{}'", other))),
        }
    }
}

/// Collaborators a datastore consults while serving requests.
#[derive(Clone)]
pub struct StoreContext {
    pub worlds: Arc<dyn WorldResolver>,
    pub clock: Arc<dyn Clock>,
}

impl StoreContext {
    pub fn new(worlds: Arc<dyn WorldResolver>, clock: Arc<dyn Clock>) -> Self {
        Self { worlds, clock }
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::new(Arc::new(AnyWorld), Arc::new(SystemClock))
    }
}

/// Storage backend for death chest records.
///
/// Implementations:
/// - `SqliteDataStore` - single file, the default
/// - `PostgresDataStore` - shared PostgreSQL server
/// - `MemoryDataStore` - HashMap, lost on exit (for testing)
///
/// Callers serialize access; backends take `&mut self` and never lock.
/// Every call blocks until its work is done.
pub trait DataStore: Send {
    fn storage_type(&self) -> StorageType;

    /// Display name such as "SQLite".
    fn name(&self) -> &'static str {
        self.storage_type().name()
    }

    /// File path or connection target, for status output.
    fn location(&self) -> String;

    fn is_initialized(&self) -> bool;

    /// Open the backing store and create the schema if needed.
    /// Calling it again once initialized does nothing.
    fn initialize(&mut self) -> StorageResult<()>;

    /// Look up the chest at an exact position.
    fn get(&mut self, world: &str, pos: BlockPos) -> StorageResult<Option<DeathChestRecord>>;

    /// Every attributable record in a loaded world.
    ///
    /// Rows in unknown worlds are left out, and expired rows of those worlds
    /// are deleted along the way.
    fn list_all(&mut self) -> StorageResult<Vec<DeathChestRecord>>;

    /// Every attributable record in every world, loaded or not.
    ///
    /// Unlike [`list_all`](Self::list_all) nothing is filtered by world and
    /// nothing is deleted. Conversion between backends reads through this.
    fn dump(&mut self) -> StorageResult<Vec<DeathChestRecord>>;

    /// Insert or replace the record at its `(world, pos)`.
    fn put(&mut self, record: &DeathChestRecord) -> StorageResult<()>;

    /// Remove the record at `(world, pos)` if there is one.
    fn delete(&mut self, world: &str, pos: BlockPos) -> StorageResult<()>;

    /// Remove expired records of one world. Returns the number removed.
    fn delete_expired_records(&mut self, world: &str) -> StorageResult<usize>;

    /// Run [`delete_expired_records`](Self::delete_expired_records) for each world.
    fn sweep_expired(&mut self, worlds: &[String]) -> StorageResult<usize> {
        let mut removed = 0;
        for world in worlds {
            removed += self.delete_expired_records(world)?;
        }
        Ok(removed)
    }

    fn close(&mut self);

    fn flush(&mut self);

    /// Destroy the persisted data, closing first if open.
    fn delete_storage(&mut self);

    /// Whether the persisted data is present. Does not need `initialize`.
    fn exists(&self) -> bool;
}

/// Turn raw table rows into the `list_all` result.
///
/// `sweep` is called once per orphaned world name; its failure is logged and
/// the scan continues.
pub(crate) fn collect_census<F>(
    rows: Vec<StoredRow>,
    worlds: &dyn WorldResolver,
    mut sweep: F,
) -> Vec<DeathChestRecord>
where
    F: FnMut(&str) -> StorageResult<usize>,
{
    let mut swept: HashSet<String> = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        if !worlds.is_known(&row.world) {
            if swept.insert(row.world.clone()) {
                log::warn!("Saved death chest world '{}' does not exist.", row.world);
                if let Err(e) = sweep(&row.world) {
                    log::warn!("Expired record cleanup for world '{}' failed: {}", row.world, e);
                }
            }
            continue;
        }

        if let Some(record) = row.decode_attributed() {
            records.push(record);
        }
    }

    records
}
