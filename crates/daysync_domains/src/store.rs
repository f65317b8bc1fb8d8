//! Per-user entity storage with tombstones.

use daysync_protocol::PatchOp;
use daysync_server::DomainError;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Entities of one user, keyed by patch key (`idea/42`).
#[derive(Debug, Default)]
pub struct UserEntities {
    live: BTreeMap<String, Value>,
    tombstones: BTreeSet<String>,
}

impl UserEntities {
    /// Returns an entity.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.live.get(key)
    }

    /// Returns true if the entity exists.
    pub fn contains(&self, key: &str) -> bool {
        self.live.contains_key(key)
    }

    /// Inserts a new entity. Fails if the key is already live.
    ///
    /// Re-creating a deleted key clears its tombstone.
    pub fn insert(&mut self, key: String, value: Value) -> Result<(), DomainError> {
        if self.live.contains_key(&key) {
            return Err(DomainError::Rejected(format!("{key} already exists")));
        }
        self.tombstones.remove(&key);
        self.live.insert(key, value);
        Ok(())
    }

    /// Overwrites the given fields of an existing entity.
    pub fn update(&mut self, key: &str, fields: Map<String, Value>) -> Result<(), DomainError> {
        let entity = self
            .live
            .get_mut(key)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| DomainError::NotFound(key.to_string()))?;
        entity.extend(fields);
        Ok(())
    }

    /// Removes an entity and records a tombstone for it.
    pub fn remove(&mut self, key: &str) -> Result<Value, DomainError> {
        let value = self
            .live
            .remove(key)
            .ok_or_else(|| DomainError::NotFound(key.to_string()))?;
        self.tombstones.insert(key.to_string());
        Ok(value)
    }

    /// Removes every entity under `prefix` matching `pred`. Returns the count.
    pub fn remove_where(&mut self, prefix: &str, pred: impl Fn(&Value) -> bool) -> usize {
        let doomed: Vec<String> = self
            .live
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, value)| pred(value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.live.remove(key);
            self.tombstones.insert(key.clone());
        }
        doomed.len()
    }

    /// Puts for every live entity in key order, then deletes for every tombstone.
    pub fn patch(&self) -> Vec<PatchOp> {
        let puts = self
            .live
            .iter()
            .map(|(key, value)| PatchOp::upsert(key.clone(), value.clone()));
        let dels = self.tombstones.iter().map(|key| PatchOp::delete(key.clone()));
        puts.chain(dels).collect()
    }
}

/// Entity storage shared by one domain, partitioned by user.
#[derive(Debug, Default)]
pub struct EntityStore {
    users: RwLock<HashMap<String, UserEntities>>,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with write access to one user's entities.
    ///
    /// All changes made inside `f` become visible together.
    pub fn write<R>(&self, user_id: &str, f: impl FnOnce(&mut UserEntities) -> R) -> R {
        let mut users = self.users.write();
        f(users.entry(user_id.to_string()).or_default())
    }

    /// Runs `f` with read access to one user's entities.
    pub fn read<R>(&self, user_id: &str, f: impl FnOnce(&UserEntities) -> R) -> R {
        let users = self.users.read();
        match users.get(user_id) {
            Some(entities) => f(entities),
            None => f(&UserEntities::default()),
        }
    }

    /// Builds the full patch for one user.
    pub fn patch(&self, user_id: &str) -> Vec<PatchOp> {
        self.read(user_id, UserEntities::patch)
    }
}
