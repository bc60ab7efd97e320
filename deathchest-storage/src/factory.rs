//! Backend selection and conversion between backend types.

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::memory::MemoryDataStore;
use crate::postgres::PostgresDataStore;
use crate::sqlite::SqliteDataStore;
use crate::{DataStore, StorageType, StoreContext};

pub struct DataStoreFactory;

impl DataStoreFactory {
    /// Build the configured backend without initializing it.
    pub fn create(config: &StorageConfig, ctx: StoreContext) -> StorageResult<Box<dyn DataStore>> {
        let store: Box<dyn DataStore> = match config.storage_type {
            StorageType::Sqlite => Box::new(SqliteDataStore::new(config.sqlite_path(), ctx)),
            StorageType::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    StorageError::Config("storage type postgres requires database-url".to_string())
                })?;
                Box::new(PostgresDataStore::new(url, ctx))
            }
            StorageType::Memory => Box::new(MemoryDataStore::new(ctx)),
        };
        Ok(store)
    }

    /// Build and initialize the configured backend.
    ///
    /// A fresh PostgreSQL store picks up the records of an existing SQLite
    /// file in the data directory, which is then removed.
    pub fn open(config: &StorageConfig, ctx: StoreContext) -> StorageResult<Box<dyn DataStore>> {
        let mut store = Self::create(config, ctx.clone())?;
        let fresh = !store.exists();
        store.initialize()?;

        if fresh && config.storage_type == StorageType::Postgres {
            let mut legacy = SqliteDataStore::new(config.sqlite_path(), ctx);
            if legacy.exists() {
                Self::convert(&mut legacy, store.as_mut())?;
            }
        }

        Ok(store)
    }

    /// Apply a possibly changed configuration to a running store.
    ///
    /// Same type: the store is re-initialized and handed back. Different
    /// type: records move to a new store and the old storage is deleted.
    pub fn reload(
        mut current: Box<dyn DataStore>,
        config: &StorageConfig,
        ctx: StoreContext,
    ) -> StorageResult<Box<dyn DataStore>> {
        if current.storage_type() == config.storage_type {
            current.initialize()?;
            return Ok(current);
        }

        let mut next = Self::create(config, ctx)?;
        next.initialize()?;
        Self::convert(current.as_mut(), next.as_mut())?;
        Ok(next)
    }

    /// Move every record from `old` into `new`, then delete `old`'s storage.
    ///
    /// `old` is only deleted once every record has been written to `new`.
    pub fn convert(old: &mut dyn DataStore, new: &mut dyn DataStore) -> StorageResult<usize> {
        old.initialize()?;
        let count = migrate(old, new)?;
        log::info!(
            "{} records converted from {} datastore to {} datastore.",
            count,
            old.name(),
            new.name()
        );
        old.delete_storage();
        Ok(count)
    }
}

/// Copy every record of `from` into `to`, whatever world it belongs to.
///
/// Stops at the first record `to` refuses; `from` is never modified.
pub fn migrate(from: &mut dyn DataStore, to: &mut dyn DataStore) -> StorageResult<usize> {
    let records = from.dump()?;
    for record in &records {
        to.put(record).inspect_err(|e| {
            log::error!(
                "Could not convert death chest at {} [{}]: {}",
                record.world,
                record.pos,
                e
            )
        })?;
    }
    to.flush();
    Ok(records.len())
}
