use std::sync::Arc;

use deathchest_storage::{
    BlockPos, DataStore, DeathChestRecord, KnownWorlds, ManualClock, SqliteDataStore,
    StorageError, StoreContext,
};
use rusqlite::{Connection, params};
use tempfile::TempDir;
use uuid::Uuid;

struct Fixture {
    dir: TempDir,
    clock: ManualClock,
    store: SqliteDataStore,
}

impl Fixture {
    fn new(worlds: &[&str]) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at_ms(0);
        let ctx = StoreContext::new(
            Arc::new(KnownWorlds::new(worlds.iter().copied())),
            Arc::new(clock.clone()),
        );
        let mut store = SqliteDataStore::new(dir.path().join("deathchests.db"), ctx);
        store.initialize().unwrap();
        Self { dir, clock, store }
    }

    /// Write a row behind the store's back, the way a hand-edited file would look.
    fn raw_insert(
        &self,
        owner: &str,
        killer: Option<&str>,
        world: &str,
        pos: BlockPos,
        expiration: i64,
    ) {
        let conn = Connection::open(self.dir.path().join("deathchests.db")).unwrap();
        conn.execute(
            "INSERT INTO blocks (ownerid, killerid, worldname, x, y, z, expiration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![owner, killer, world, pos.x, pos.y, pos.z, expiration],
        )
        .unwrap();
    }
}

fn chest(world: &str, x: i32, y: i32, z: i32, expiration: i64) -> DeathChestRecord {
    DeathChestRecord::new(Uuid::new_v4(), world, BlockPos::new(x, y, z), expiration)
}

#[test]
fn put_then_get_returns_record() {
    let mut fx = Fixture::new(&["world"]);
    let record = chest("world", 10, 64, -5, 1000).with_killer(Uuid::new_v4());

    fx.store.put(&record).unwrap();
    assert_eq!(fx.store.get("world", record.pos).unwrap(), Some(record));
}

#[test]
fn last_writer_wins() {
    let mut fx = Fixture::new(&["world"]);
    let first = chest("world", 1, 2, 3, 1000).with_killer(Uuid::new_v4());
    let second = chest("world", 1, 2, 3, 2000);

    fx.store.put(&first).unwrap();
    fx.store.put(&second).unwrap();

    assert_eq!(fx.store.get("world", second.pos).unwrap(), Some(second.clone()));
    assert_eq!(fx.store.list_all().unwrap(), vec![second]);
}

#[test]
fn delete_missing_key_is_noop() {
    let mut fx = Fixture::new(&["world"]);
    let record = chest("world", 0, 0, 0, 1000);
    fx.store.put(&record).unwrap();

    fx.store.delete("world", BlockPos::new(9, 9, 9)).unwrap();
    fx.store.delete("other", record.pos).unwrap();
    assert_eq!(fx.store.list_all().unwrap(), vec![record]);
}

#[test]
fn list_all_returns_every_record() {
    let mut fx = Fixture::new(&["world", "world_nether"]);
    let mut written: Vec<_> = (0..5)
        .map(|i| chest("world", i, 64, -i, 1000 + i as i64))
        .chain((0..3).map(|i| chest("world_nether", i, 32, i, 5000)))
        .collect();
    for record in &written {
        fx.store.put(record).unwrap();
    }

    let mut listed = fx.store.list_all().unwrap();
    let key = |r: &DeathChestRecord| (r.world.clone(), r.pos.x, r.pos.y, r.pos.z);
    listed.sort_by_key(key);
    written.sort_by_key(key);
    assert_eq!(listed, written);
}

#[test]
fn missing_owner_is_never_persisted() {
    let mut fx = Fixture::new(&["world"]);
    let mut record = chest("world", 5, 5, 5, 1000);
    record.owner_id = None;

    assert!(matches!(
        fx.store.put(&record),
        Err(StorageError::InvalidOwnerIdentity)
    ));
    assert_eq!(fx.store.get("world", record.pos).unwrap(), None);
}

#[test]
fn unparseable_killer_reads_as_absent() {
    let fx = Fixture::new(&["world"]);
    let owner = Uuid::new_v4();
    let pos = BlockPos::new(0, 0, 0);
    fx.raw_insert(&owner.to_string(), Some("not-a-uuid"), "world", pos, 9_999_999_999);

    let mut store = fx.store;
    let record = store.get("world", pos).unwrap().unwrap();
    assert_eq!(record.owner_id, Some(owner));
    assert_eq!(record.killer_id, None);
    assert_eq!(record.expiration, 9_999_999_999);

    assert_eq!(store.list_all().unwrap(), vec![record]);
}

#[test]
fn corrupt_owner_dropped_from_scan_but_visible_to_get() {
    let mut fx = Fixture::new(&["world"]);
    let good = chest("world", 1, 1, 1, 1000);
    fx.store.put(&good).unwrap();
    fx.raw_insert("garbage", None, "world", BlockPos::new(2, 2, 2), 1000);

    assert_eq!(fx.store.list_all().unwrap(), vec![good]);

    let corrupt = fx.store.get("world", BlockPos::new(2, 2, 2)).unwrap().unwrap();
    assert_eq!(corrupt.owner_id, None);
    assert_eq!(corrupt.expiration, 1000);
}

#[test]
fn sweep_removes_only_expired_rows_of_one_world() {
    let mut fx = Fixture::new(&["world", "world_nether"]);
    let expired = chest("world", 10, 64, -5, 1000);
    let at_boundary = chest("world", 11, 64, -5, 1500);
    let fresh = chest("world", 12, 64, -5, 2000);
    let other_world = chest("world_nether", 10, 64, -5, 1000);
    for r in [&expired, &at_boundary, &fresh, &other_world] {
        fx.store.put(r).unwrap();
    }

    fx.clock.set_ms(1500);
    assert_eq!(fx.store.delete_expired_records("world").unwrap(), 2);

    assert_eq!(fx.store.get("world", expired.pos).unwrap(), None);
    assert_eq!(fx.store.get("world", at_boundary.pos).unwrap(), None);
    assert_eq!(fx.store.get("world", fresh.pos).unwrap(), Some(fresh));
    assert_eq!(
        fx.store.get("world_nether", other_world.pos).unwrap(),
        Some(other_world)
    );
}

#[test]
fn sweep_expired_across_worlds() {
    let mut fx = Fixture::new(&["world", "world_nether"]);
    fx.store.put(&chest("world", 0, 0, 0, 100)).unwrap();
    fx.store.put(&chest("world_nether", 0, 0, 0, 100)).unwrap();
    fx.store.put(&chest("world_nether", 1, 0, 0, 10_000)).unwrap();

    fx.clock.set_ms(500);
    let worlds = vec!["world".to_string(), "world_nether".to_string()];
    assert_eq!(fx.store.sweep_expired(&worlds).unwrap(), 2);
    assert_eq!(fx.store.list_all().unwrap().len(), 1);
}

#[test]
fn orphaned_world_is_skipped_and_swept() {
    let mut fx = Fixture::new(&["world"]);
    let live = chest("world", 0, 0, 0, 100);
    let orphan_expired = chest("deleted_world", 1, 1, 1, 100);
    let orphan_fresh = chest("deleted_world", 2, 2, 2, 10_000);
    for r in [&live, &orphan_expired, &orphan_fresh] {
        fx.store.put(r).unwrap();
    }

    fx.clock.set_ms(500);
    assert_eq!(fx.store.list_all().unwrap(), vec![live]);

    assert_eq!(fx.store.get("deleted_world", orphan_expired.pos).unwrap(), None);
    assert_eq!(
        fx.store.get("deleted_world", orphan_fresh.pos).unwrap(),
        Some(orphan_fresh)
    );
}

#[test]
fn close_is_idempotent() {
    let mut fx = Fixture::new(&["world"]);
    fx.store.close();
    fx.store.close();
    assert!(!fx.store.is_initialized());
    assert!(matches!(
        fx.store.put(&chest("world", 0, 0, 0, 1)),
        Err(StorageError::NotInitialized)
    ));

    let ctx = StoreContext::default();
    let mut never_opened = SqliteDataStore::new(fx.dir.path().join("other.db"), ctx);
    never_opened.close();
    never_opened.close();
}

#[test]
fn exists_tracks_file_not_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deathchests.db");

    let mut store = SqliteDataStore::new(&path, StoreContext::default());
    assert!(!store.exists());
    assert!(!store.is_initialized());

    store.initialize().unwrap();
    store.initialize().unwrap();
    assert!(store.exists());

    store.close();
    let reopened = SqliteDataStore::new(&path, StoreContext::default());
    assert!(reopened.exists());
    assert!(!reopened.is_initialized());

    store.delete_storage();
    assert!(!store.exists());
    assert!(!path.exists());
    store.delete_storage();
}

#[test]
fn records_survive_reopen() {
    let mut fx = Fixture::new(&["world"]);
    let record = chest("world", -100, 70, 250, 123_456).with_killer(Uuid::new_v4());
    fx.store.put(&record).unwrap();
    fx.store.flush();
    fx.store.close();

    fx.store.initialize().unwrap();
    assert_eq!(fx.store.get("world", record.pos).unwrap(), Some(record));
}

#[test]
fn initialize_creates_missing_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugins").join("DeathChest").join("deathchests.db");

    let mut store = SqliteDataStore::new(&path, StoreContext::default());
    store.initialize().unwrap();
    assert!(path.exists());
    assert_eq!(store.location(), path.display().to_string());
    assert_eq!(store.name(), "SQLite");
}
