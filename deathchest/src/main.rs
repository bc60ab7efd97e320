use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use deathchest_storage::{
    AnyWorld, BlockPos, DataStore, DataStoreFactory, KnownWorlds, StorageConfig, StorageType,
    StoreContext, SystemClock, WorldResolver,
};

#[derive(Parser)]
#[command(name = "deathchest", about = "Inspect and maintain the death chest datastore")]
pub struct Args {
    /// Storage backend: "sqlite", "postgres" or "memory"
    #[arg(long, env = "STORAGE_TYPE", default_value = "sqlite")]
    pub storage: StorageType,

    /// Directory holding the SQLite file
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// PostgreSQL connection string (postgres backend)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Chest lifetime in minutes, shown by `status`
    #[arg(
        long,
        env = "EXPIRE_TIME",
        default_value_t = deathchest_storage::config::DEFAULT_EXPIRE_MINUTES
    )]
    pub expire_time: i64,

    /// Loaded world; repeat for several. Without any, every world counts as loaded.
    #[arg(long = "world", global = true)]
    pub worlds: Vec<String>,

    #[arg(long, env = "DEATHCHEST_DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show backend, location and record count
    Status,
    /// Print every stored death chest
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete expired chests
    Sweep,
    /// Delete the chest at one position
    Remove {
        world: String,
        x: i32,
        y: i32,
        z: i32,
    },
    /// Move all records to another backend and delete the old storage
    Migrate {
        to: StorageType,
    },
}

impl Args {
    fn config(&self) -> StorageConfig {
        StorageConfig {
            storage_type: self.storage,
            data_dir: self.data_dir.clone(),
            database_url: self.database_url.clone(),
            debug: self.debug,
            expire_time: self.expire_time,
            ..StorageConfig::default()
        }
    }

    fn context(&self) -> StoreContext {
        let worlds: Arc<dyn WorldResolver> = if self.worlds.is_empty() {
            Arc::new(AnyWorld)
        } else {
            Arc::new(KnownWorlds::new(self.worlds.iter().cloned()))
        };
        StoreContext::new(worlds, Arc::new(SystemClock))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config();

    let mut logger = env_logger::Builder::from_default_env();
    if config.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let store = DataStoreFactory::open(&config, args.context())
        .with_context(|| format!("Could not open {} datastore", config.storage_type))?;

    run(&args, &config, store)
}

fn run(args: &Args, config: &StorageConfig, mut store: Box<dyn DataStore>) -> Result<()> {
    match &args.command {
        Command::Status => {
            let records = store.list_all().context("Could not read records")?;
            println!("Storage Type: {}", store.name());
            println!("Location: {}", store.location());
            println!("Exists: {}", store.exists());
            println!("Records: {}", records.len());
            if config.expire_time > 0 {
                println!("Chest Expiration: {} minutes", config.expire_time);
            } else {
                println!("Chest Expiration: never");
            }
            if args.worlds.is_empty() {
                println!("Enabled Worlds: [all]");
            } else {
                println!("Enabled Worlds: {:?}", config.worlds.enabled_worlds(&args.worlds));
            }
        }
        Command::List { json } => {
            let records = store.list_all().context("Could not read records")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for r in &records {
                    let owner = r.owner_id.map(|id| id.to_string()).unwrap_or_default();
                    let killer = r
                        .killer_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} [{}] owner={} killer={} expiration={}",
                        r.world, r.pos, owner, killer, r.expiration
                    );
                }
                println!("{} records", records.len());
            }
        }
        Command::Sweep => {
            let worlds: Vec<String> = if args.worlds.is_empty() {
                let mut seen: Vec<String> = store
                    .list_all()
                    .context("Could not read records")?
                    .into_iter()
                    .map(|r| r.world)
                    .collect();
                seen.sort();
                seen.dedup();
                seen
            } else {
                args.worlds.clone()
            };
            let removed = store
                .sweep_expired(&worlds)
                .context("Expired record sweep failed")?;
            println!("Removed {} expired death chests from {} worlds", removed, worlds.len());
        }
        Command::Remove { world, x, y, z } => {
            let pos = BlockPos::new(*x, *y, *z);
            match store.get(world, pos)? {
                Some(_) => {
                    store.delete(world, pos)?;
                    println!("Removed death chest at {} [{}]", world, pos);
                }
                None => println!("No death chest at {} [{}]", world, pos),
            }
        }
        Command::Migrate { to } => {
            let target = StorageConfig {
                storage_type: *to,
                ..config.clone()
            };
            store = DataStoreFactory::reload(store, &target, args.context())
                .with_context(|| format!("Could not migrate to {} datastore", to))?;
            println!("Datastore is now {} at {}", store.name(), store.location());
        }
    }

    store.flush();
    store.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deathchest_storage::DeathChestRecord;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "deathchest",
            "--storage",
            "memory",
            "--world",
            "world",
            "--world",
            "world_nether",
            "sweep",
        ])
        .unwrap();
        assert_eq!(args.storage, StorageType::Memory);
        assert_eq!(args.worlds, vec!["world", "world_nether"]);
        assert!(matches!(args.command, Command::Sweep));

        assert!(Args::try_parse_from(["deathchest", "--storage", "redis", "status"]).is_err());
    }

    #[test]
    fn test_run_against_memory_store() {
        let args = Args::try_parse_from([
            "deathchest",
            "--storage",
            "memory",
            "remove",
            "world",
            "1",
            "2",
            "3",
        ])
        .unwrap();
        let config = args.config();
        let mut store = DataStoreFactory::open(&config, args.context()).unwrap();
        let owner = "5f1b0e3c-2a4d-4c7e-9b8a-0d6f3e2c1a90".parse().unwrap();
        store
            .put(&DeathChestRecord::new(owner, "world", BlockPos::new(1, 2, 3), 0))
            .unwrap();

        run(&args, &config, store).unwrap();
    }
}
