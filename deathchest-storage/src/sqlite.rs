//! SQLite storage backend.
//!
//! One file, one `blocks` table, unique on `(worldname, x, y, z)`.

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{StorageError, StorageResult};
use crate::identity;
use crate::record::{BlockPos, DeathChestRecord, StoredRow};
use crate::{DataStore, StorageType, StoreContext, collect_census};

const CREATE_BLOCKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS blocks (
    blockid INTEGER PRIMARY KEY,
    ownerid VARCHAR(36) NOT NULL,
    killerid VARCHAR(36),
    worldname VARCHAR(255) NOT NULL,
    x INTEGER,
    y INTEGER,
    z INTEGER,
    expiration INTEGER,
    UNIQUE (worldname, x, y, z)
)";

const SELECT_COLUMNS: &str = "SELECT ownerid, killerid, worldname, x, y, z, expiration FROM blocks";

const SCAN_COLUMNS: &str =
    "SELECT ownerid, killerid, worldname, x, y, z, expiration, blockid FROM blocks";

enum State {
    Uninitialized,
    Initialized(Connection),
    Closed,
}

pub struct SqliteDataStore {
    path: PathBuf,
    ctx: StoreContext,
    state: State,
}

impl SqliteDataStore {
    pub fn new(path: impl Into<PathBuf>, ctx: StoreContext) -> Self {
        Self {
            path: path.into(),
            ctx,
            state: State::Uninitialized,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> StorageResult<&Connection> {
        match &self.state {
            State::Initialized(conn) => Ok(conn),
            _ => Err(StorageError::NotInitialized),
        }
    }

    fn open(&self) -> StorageResult<Connection> {
        let target = self.path.display();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::backend("initialize", &target, e))?;
            }
        }

        let conn = Connection::open(&self.path)
            .map_err(|e| StorageError::backend("initialize", &target, e))?;
        conn.execute_batch(CREATE_BLOCKS_TABLE)
            .map_err(|e| StorageError::backend("initialize", &target, e))?;
        Ok(conn)
    }
}

/// Read a text column without failing on foreign value types.
///
/// Anything that is not text or NULL is rendered so identifier decoding can
/// reject it as malformed.
fn text_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Blob(bytes) => Some(format!("<{} byte blob>", bytes.len())),
    })
}

fn stored_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        owner_id: text_column(row, 0)?,
        killer_id: text_column(row, 1)?,
        world: row.get(2)?,
        pos: BlockPos::new(row.get(3)?, row.get(4)?, row.get(5)?),
        expiration: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
    })
}

/// Read every row of the table. Rows whose cells cannot be read as a record
/// (NULL coordinates, non-text world) are logged by `blockid` and skipped.
fn scan_rows(conn: &Connection) -> rusqlite::Result<Vec<StoredRow>> {
    let mut stmt = conn.prepare(SCAN_COLUMNS)?;
    let scanned = stmt
        .query_map([], |row| {
            let blockid: i64 = row.get(7)?;
            Ok(stored_row(row).map_err(|e| (blockid, e)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(scanned
        .into_iter()
        .filter_map(|row| match row {
            Ok(row) => Some(row),
            Err((blockid, e)) => {
                log::warn!("Skipping unreadable death chest row {}: {}", blockid, e);
                None
            }
        })
        .collect())
}

fn delete_expired(conn: &Connection, world: &str, now_ms: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM blocks WHERE worldname = ?1 AND expiration <= ?2",
        params![world, now_ms],
    )
}

impl DataStore for SqliteDataStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Sqlite
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized(_))
    }

    fn initialize(&mut self) -> StorageResult<()> {
        if self.is_initialized() {
            log::info!("{} datastore already initialized.", self.name());
            return Ok(());
        }

        let conn = self.open()?;
        self.state = State::Initialized(conn);
        log::info!("{} datastore initialized at {}.", self.name(), self.path.display());
        Ok(())
    }

    fn get(&mut self, world: &str, pos: BlockPos) -> StorageResult<Option<DeathChestRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE worldname = ?1 AND x = ?2 AND y = ?3 AND z = ?4"),
                params![world, pos.x, pos.y, pos.z],
                stored_row,
            )
            .optional()
            .map_err(|e| StorageError::backend("get", format_args!("{} [{}]", world, pos), e))?;

        Ok(row.map(StoredRow::decode_lenient))
    }

    fn list_all(&mut self) -> StorageResult<Vec<DeathChestRecord>> {
        let conn = self.conn()?;
        let rows = scan_rows(conn).map_err(|e| StorageError::backend("list_all", "blocks", e))?;

        let now_ms = self.ctx.clock.now_millis();
        let records = collect_census(rows, self.ctx.worlds.as_ref(), |world| {
            delete_expired(conn, world, now_ms)
                .map_err(|e| StorageError::backend("delete_expired_records", world, e))
        });

        log::debug!("{} records fetched from {} datastore.", records.len(), self.name());
        Ok(records)
    }

    fn dump(&mut self) -> StorageResult<Vec<DeathChestRecord>> {
        let conn = self.conn()?;
        let rows = scan_rows(conn).map_err(|e| StorageError::backend("dump", "blocks", e))?;
        Ok(rows.into_iter().filter_map(StoredRow::decode_attributed).collect())
    }

    fn put(&mut self, record: &DeathChestRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        let owner_id = identity::encode_owner(record.owner_id).inspect_err(|_| {
            log::warn!(
                "Refusing to store death chest at {} [{}]: owner UUID is invalid.",
                record.world,
                record.pos
            )
        })?;
        let killer_id = identity::encode_killer(record.killer_id);

        let rows = conn
            .execute(
                "INSERT OR REPLACE INTO blocks (ownerid, killerid, worldname, x, y, z, expiration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    owner_id,
                    killer_id,
                    record.world,
                    record.pos.x,
                    record.pos.y,
                    record.pos.z,
                    record.expiration
                ],
            )
            .map_err(|e| {
                StorageError::backend("put", format_args!("{} [{}]", record.world, record.pos), e)
            })?;

        log::debug!("{} rows affected.", rows);
        Ok(())
    }

    fn delete(&mut self, world: &str, pos: BlockPos) -> StorageResult<()> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "DELETE FROM blocks WHERE worldname = ?1 AND x = ?2 AND y = ?3 AND z = ?4",
                params![world, pos.x, pos.y, pos.z],
            )
            .map_err(|e| StorageError::backend("delete", format_args!("{} [{}]", world, pos), e))?;

        log::debug!("{} rows deleted.", rows);
        Ok(())
    }

    fn delete_expired_records(&mut self, world: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let now_ms = self.ctx.clock.now_millis();
        let rows = delete_expired(conn, world, now_ms)
            .map_err(|e| StorageError::backend("delete_expired_records", world, e))?;

        log::debug!("{} expired rows deleted in world '{}'.", rows, world);
        Ok(rows)
    }

    fn close(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Initialized(conn) => {
                if let Err((_, e)) = conn.close() {
                    log::error!("Error closing {} datastore: {}", self.name(), e);
                } else {
                    log::info!("{} datastore connection closed.", self.name());
                }
            }
            State::Uninitialized => self.state = State::Uninitialized,
            State::Closed => {}
        }
    }

    fn flush(&mut self) {
        // every statement commits on its own; nothing is buffered
    }

    fn delete_storage(&mut self) {
        self.close();
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("{} datastore file {} deleted.", self.name(), self.path.display()),
            Err(e) => log::error!("Could not delete {}: {}", self.path.display(), e),
        }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}
