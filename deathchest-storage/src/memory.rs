//! In-memory storage backend using HashMap.
//!
//! Useful for development and testing. Data is lost on restart.

use std::collections::HashMap;

use crate::error::{StorageError, StorageResult};
use crate::identity;
use crate::record::{BlockPos, DeathChestRecord};
use crate::{DataStore, StorageType, StoreContext};

type ChestKey = (String, BlockPos);

/// In-memory death chest storage.
///
/// The map is created by `initialize` and survives `close`, so a closed
/// store can be re-initialized with its records intact until
/// `delete_storage` drops them.
pub struct MemoryDataStore {
    chests: Option<HashMap<ChestKey, DeathChestRecord>>,
    initialized: bool,
    ctx: StoreContext,
}

impl MemoryDataStore {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            chests: None,
            initialized: false,
            ctx,
        }
    }

    fn chests(&mut self) -> StorageResult<&mut HashMap<ChestKey, DeathChestRecord>> {
        match (self.initialized, self.chests.as_mut()) {
            (true, Some(chests)) => Ok(chests),
            _ => Err(StorageError::NotInitialized),
        }
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new(StoreContext::default())
    }
}

impl DataStore for MemoryDataStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> StorageResult<()> {
        if self.initialized {
            log::info!("{} datastore already initialized.", self.name());
            return Ok(());
        }
        self.chests.get_or_insert_with(HashMap::new);
        self.initialized = true;
        log::info!("{} datastore initialized.", self.name());
        Ok(())
    }

    fn get(&mut self, world: &str, pos: BlockPos) -> StorageResult<Option<DeathChestRecord>> {
        Ok(self.chests()?.get(&(world.to_string(), pos)).cloned())
    }

    fn list_all(&mut self) -> StorageResult<Vec<DeathChestRecord>> {
        let worlds = self.ctx.worlds.clone();
        let (known, orphaned): (Vec<_>, Vec<_>) = self
            .chests()?
            .values()
            .cloned()
            .partition(|r| worlds.is_known(&r.world));

        let mut swept: Vec<String> = Vec::new();
        for record in orphaned {
            if swept.contains(&record.world) {
                continue;
            }
            log::warn!("Saved death chest world '{}' does not exist.", record.world);
            if let Err(e) = self.delete_expired_records(&record.world) {
                log::warn!("Expired record cleanup for world '{}' failed: {}", record.world, e);
            }
            swept.push(record.world);
        }

        log::debug!("{} records fetched from {} datastore.", known.len(), self.name());
        Ok(known)
    }

    fn dump(&mut self) -> StorageResult<Vec<DeathChestRecord>> {
        Ok(self.chests()?.values().cloned().collect())
    }

    fn put(&mut self, record: &DeathChestRecord) -> StorageResult<()> {
        let chests = self.chests()?;
        identity::encode_owner(record.owner_id)?;
        chests.insert((record.world.clone(), record.pos), record.clone());
        Ok(())
    }

    fn delete(&mut self, world: &str, pos: BlockPos) -> StorageResult<()> {
        self.chests()?.remove(&(world.to_string(), pos));
        Ok(())
    }

    fn delete_expired_records(&mut self, world: &str) -> StorageResult<usize> {
        let now_ms = self.ctx.clock.now_millis();
        let chests = self.chests()?;
        let before = chests.len();
        chests.retain(|(w, _), record| w != world || !record.is_expired(now_ms));
        Ok(before - chests.len())
    }

    fn close(&mut self) {
        if self.initialized {
            self.initialized = false;
            log::info!("{} datastore closed.", self.name());
        }
    }

    fn flush(&mut self) {}

    fn delete_storage(&mut self) {
        self.close();
        self.chests = None;
    }

    fn exists(&self) -> bool {
        self.chests.is_some()
    }
}
