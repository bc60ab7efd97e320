//! PostgreSQL storage backend.
//!
//! Same table contract as the SQLite file. The driver is async, so each
//! store owns a small runtime and blocks on it for every call.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::error::{BackendError, StorageError, StorageResult};
use crate::identity;
use crate::record::{BlockPos, DeathChestRecord, StoredRow};
use crate::{DataStore, StorageType, StoreContext, collect_census};

const TABLE: &str = "deathchest_blocks";

const CREATE_BLOCKS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS deathchest_blocks (
        blockid BIGSERIAL PRIMARY KEY,
        ownerid VARCHAR(36) NOT NULL,
        killerid VARCHAR(36),
        worldname VARCHAR(255) NOT NULL,
        x INTEGER NOT NULL,
        y INTEGER NOT NULL,
        z INTEGER NOT NULL,
        expiration BIGINT,
        UNIQUE (worldname, x, y, z)
    );
";

const SELECT_COLUMNS: &str =
    "SELECT ownerid, killerid, worldname, x, y, z, expiration FROM deathchest_blocks";

const SCAN_COLUMNS: &str =
    "SELECT ownerid, killerid, worldname, x, y, z, expiration, blockid FROM deathchest_blocks";

/// Pool plus the runtime that drives it.
struct Connection {
    pool: Pool,
    rt: tokio::runtime::Runtime,
}

impl Connection {
    fn open(url: &str) -> Result<Self, BackendError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        Ok(Self { pool, rt })
    }

    fn batch_execute(&self, sql: &str) -> Result<(), BackendError> {
        self.rt.block_on(async {
            let client = self.pool.get().await?;
            client.batch_execute(sql).await?;
            Ok::<(), BackendError>(())
        })
    }

    fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, BackendError> {
        self.rt.block_on(async {
            let client = self.pool.get().await?;
            let rows = client.execute(sql, params).await?;
            Ok::<u64, BackendError>(rows)
        })
    }

    fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, BackendError> {
        self.rt.block_on(async {
            let client = self.pool.get().await?;
            let rows = client.query(sql, params).await?;
            Ok::<Vec<Row>, BackendError>(rows)
        })
    }

    /// Every readable row of the table; unreadable ones are logged and skipped.
    fn scan(&self) -> Result<Vec<StoredRow>, BackendError> {
        let rows = self.query(SCAN_COLUMNS, &[])?;
        Ok(rows
            .iter()
            .filter_map(|row| match stored_row(row) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    let blockid = row.try_get::<_, i64>(7).unwrap_or_default();
                    log::warn!("Skipping unreadable death chest row {}: {}", blockid, e);
                    None
                }
            })
            .collect())
    }

    fn delete_expired(&self, world: &str, now_ms: i64) -> Result<usize, BackendError> {
        let rows = self.execute(
            "DELETE FROM deathchest_blocks WHERE worldname = $1 AND expiration <= $2",
            &[&world, &now_ms],
        )?;
        Ok(rows as usize)
    }
}

fn stored_row(row: &Row) -> Result<StoredRow, BackendError> {
    Ok(StoredRow {
        owner_id: row.try_get(0)?,
        killer_id: row.try_get(1)?,
        world: row.try_get(2)?,
        pos: BlockPos::new(row.try_get(3)?, row.try_get(4)?, row.try_get(5)?),
        expiration: row.try_get::<_, Option<i64>>(6)?.unwrap_or_default(),
    })
}

/// Hide the password part of a connection string.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => match credentials.split_once(':') {
            Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}

enum State {
    Uninitialized,
    Initialized(Connection),
    Closed,
}

pub struct PostgresDataStore {
    url: String,
    ctx: StoreContext,
    state: State,
}

impl PostgresDataStore {
    pub fn new(url: impl Into<String>, ctx: StoreContext) -> Self {
        Self {
            url: url.into(),
            ctx,
            state: State::Uninitialized,
        }
    }

    fn conn(&self) -> StorageResult<&Connection> {
        match &self.state {
            State::Initialized(conn) => Ok(conn),
            _ => Err(StorageError::NotInitialized),
        }
    }

    /// Run `f` on the open connection, or on a short-lived one when closed.
    fn with_any_connection<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> Result<T, BackendError>,
    ) -> StorageResult<T> {
        let result = match &self.state {
            State::Initialized(conn) => f(conn),
            _ => Connection::open(&self.url).and_then(|conn| f(&conn)),
        };
        result.map_err(|e| StorageError::backend(operation, TABLE, e))
    }
}

impl DataStore for PostgresDataStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Postgres
    }

    fn location(&self) -> String {
        redact(&self.url)
    }

    fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized(_))
    }

    fn initialize(&mut self) -> StorageResult<()> {
        if self.is_initialized() {
            log::info!("{} datastore already initialized.", self.name());
            return Ok(());
        }

        let conn = Connection::open(&self.url)
            .and_then(|conn| conn.batch_execute(CREATE_BLOCKS_TABLE).map(|_| conn))
            .map_err(|e| StorageError::backend("initialize", self.location(), e))?;

        self.state = State::Initialized(conn);
        log::info!("{} datastore initialized at {}.", self.name(), self.location());
        Ok(())
    }

    fn get(&mut self, world: &str, pos: BlockPos) -> StorageResult<Option<DeathChestRecord>> {
        let conn = self.conn()?;
        let target = format!("{} [{}]", world, pos);
        let rows = conn
            .query(
                &format!("{SELECT_COLUMNS} WHERE worldname = $1 AND x = $2 AND y = $3 AND z = $4"),
                &[&world, &pos.x, &pos.y, &pos.z],
            )
            .map_err(|e| StorageError::backend("get", &target, e))?;

        match rows.first() {
            Some(row) => {
                let row = stored_row(row).map_err(|e| StorageError::backend("get", &target, e))?;
                Ok(Some(row.decode_lenient()))
            }
            None => Ok(None),
        }
    }

    fn list_all(&mut self) -> StorageResult<Vec<DeathChestRecord>> {
        let conn = self.conn()?;
        let rows = conn
            .scan()
            .map_err(|e| StorageError::backend("list_all", TABLE, e))?;

        let now_ms = self.ctx.clock.now_millis();
        let records = collect_census(rows, self.ctx.worlds.as_ref(), |world| {
            conn.delete_expired(world, now_ms)
                .map_err(|e| StorageError::backend("delete_expired_records", world, e))
        });

        log::debug!("{} records fetched from {} datastore.", records.len(), self.name());
        Ok(records)
    }

    fn dump(&mut self) -> StorageResult<Vec<DeathChestRecord>> {
        let rows = self
            .conn()?
            .scan()
            .map_err(|e| StorageError::backend("dump", TABLE, e))?;
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
                "INSERT INTO deathchest_blocks (ownerid, killerid, worldname, x, y, z, expiration)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (worldname, x, y, z) DO UPDATE
                 SET ownerid = EXCLUDED.ownerid,
                     killerid = EXCLUDED.killerid,
                     expiration = EXCLUDED.expiration",
                &[
                    &owner_id,
                    &killer_id,
                    &record.world,
                    &record.pos.x,
                    &record.pos.y,
                    &record.pos.z,
                    &record.expiration,
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
                "DELETE FROM deathchest_blocks WHERE worldname = $1 AND x = $2 AND y = $3 AND z = $4",
                &[&world, &pos.x, &pos.y, &pos.z],
            )
            .map_err(|e| StorageError::backend("delete", format_args!("{} [{}]", world, pos), e))?;

        log::debug!("{} rows deleted.", rows);
        Ok(())
    }

    fn delete_expired_records(&mut self, world: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let now_ms = self.ctx.clock.now_millis();
        let rows = conn
            .delete_expired(world, now_ms)
            .map_err(|e| StorageError::backend("delete_expired_records", world, e))?;

        log::debug!("{} expired rows deleted in world '{}'.", rows, world);
        Ok(rows)
    }

    fn close(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Initialized(conn) => {
                conn.pool.close();
                drop(conn);
                log::info!("{} datastore connection closed.", self.name());
            }
            State::Uninitialized => self.state = State::Uninitialized,
            State::Closed => {}
        }
    }

    fn flush(&mut self) {
        // statements autocommit; nothing is buffered client-side
    }

    fn delete_storage(&mut self) {
        let dropped = self.with_any_connection("delete_storage", |conn| {
            conn.batch_execute("DROP TABLE IF EXISTS deathchest_blocks")
        });
        self.close();
        if dropped.is_ok() {
            log::info!("{} datastore table {} dropped.", self.name(), TABLE);
        }
    }

    fn exists(&self) -> bool {
        self.with_any_connection("exists", |conn| {
            let rows = conn.query("SELECT to_regclass($1) IS NOT NULL", &[&TABLE])?;
            let present = rows.first().map(|row| row.try_get::<_, bool>(0)).transpose()?;
            Ok(present.unwrap_or(false))
        })
        .unwrap_or(false)
    }
}
