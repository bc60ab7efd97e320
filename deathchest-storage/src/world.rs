//! Which worlds the host currently has loaded.

use std::collections::HashSet;

/// Answers whether a world name refers to a loaded world.
///
/// Used by `list_all` to spot orphaned records.
pub trait WorldResolver: Send + Sync {
    fn is_known(&self, world: &str) -> bool;
}

/// A fixed set of world names.
#[derive(Debug, Clone, Default)]
pub struct KnownWorlds {
    names: HashSet<String>,
}

impl KnownWorlds {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.names.remove(name);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl WorldResolver for KnownWorlds {
    fn is_known(&self, world: &str) -> bool {
        self.names.contains(world)
    }
}

/// Treats every world as loaded. For tooling that runs without a server.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyWorld;

impl WorldResolver for AnyWorld {
    fn is_known(&self, _world: &str) -> bool {
        true
    }
}
