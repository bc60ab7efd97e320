//! The death chest record and its raw row form.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity;

/// Block coordinates of a chest within a world.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// One death chest placed in the world.
///
/// `(world, pos)` is the unique key. `expiration` is in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathChestRecord {
    pub owner_id: Option<Uuid>,
    pub killer_id: Option<Uuid>,
    pub world: String,
    pub pos: BlockPos,
    pub expiration: i64,
}

impl DeathChestRecord {
    pub fn new(owner_id: Uuid, world: impl Into<String>, pos: BlockPos, expiration: i64) -> Self {
        Self {
            owner_id: Some(owner_id),
            killer_id: None,
            world: world.into(),
            pos,
            expiration,
        }
    }

    pub fn with_killer(mut self, killer_id: Uuid) -> Self {
        self.killer_id = Some(killer_id);
        self
    }

    /// True once `now_ms` has reached the expiration instant.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiration <= now_ms
    }
}

/// A row as it comes out of a relational table, identifiers still encoded.
#[derive(Debug, Clone)]
pub(crate) struct StoredRow {
    pub owner_id: Option<String>,
    pub killer_id: Option<String>,
    pub world: String,
    pub pos: BlockPos,
    pub expiration: i64,
}

impl StoredRow {
    /// Point lookup policy: bad identifiers become empty fields.
    pub fn decode_lenient(self) -> DeathChestRecord {
        DeathChestRecord {
            owner_id: identity::decode_lenient(self.owner_id.as_deref(), "ownerid"),
            killer_id: identity::decode_lenient(self.killer_id.as_deref(), "killerid"),
            world: self.world,
            pos: self.pos,
            expiration: self.expiration,
        }
    }

    /// Scan policy: a row without a usable owner is dropped.
    pub fn decode_attributed(self) -> Option<DeathChestRecord> {
        let owner_id = match identity::decode(self.owner_id.as_deref()) {
            Ok(id) => id,
            Err(e) => {
                log::warn!(
                    "Skipping death chest at {} [{}]: ownerid {}",
                    self.world,
                    self.pos,
                    e
                );
                return None;
            }
        };

        Some(DeathChestRecord {
            owner_id: Some(owner_id),
            killer_id: identity::decode_lenient(self.killer_id.as_deref(), "killerid"),
            world: self.world,
            pos: self.pos,
            expiration: self.expiration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(owner: &str, killer: Option<&str>) -> StoredRow {
        StoredRow {
            owner_id: Some(owner.to_string()),
            killer_id: killer.map(str::to_string),
            world: "world".to_string(),
            pos: BlockPos::new(1, 2, 3),
            expiration: 42,
        }
    }

    #[test]
    fn test_expiration_boundary() {
        let record = DeathChestRecord::new(Uuid::new_v4(), "world", BlockPos::new(0, 0, 0), 1000);
        assert!(!record.is_expired(999));
        assert!(record.is_expired(1000));
        assert!(record.is_expired(1500));
    }

    #[test]
    fn test_bad_killer_keeps_owner() {
        let owner = Uuid::new_v4();
        let record = row(&owner.to_string(), Some("not-a-uuid")).decode_lenient();
        assert_eq!(record.owner_id, Some(owner));
        assert_eq!(record.killer_id, None);

        let record = row(&owner.to_string(), Some("not-a-uuid"))
            .decode_attributed()
            .unwrap();
        assert_eq!(record.owner_id, Some(owner));
        assert_eq!(record.killer_id, None);
    }

    #[test]
    fn test_bad_owner_policies() {
        let record = row("garbage", None).decode_lenient();
        assert_eq!(record.owner_id, None);
        assert_eq!(record.pos, BlockPos::new(1, 2, 3));

        assert!(row("garbage", None).decode_attributed().is_none());
    }
}
