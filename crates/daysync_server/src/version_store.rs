//! Per-user, per-client mutation ordinals.
//!
//! The version store is the only place that records how far each client's
//! mutation sequence has been applied. Cookies are minted from it; they are
//! never stored. With a [`VersionBackend`] attached, every advance is
//! persisted before it becomes visible and the table is reloaded on startup.

use crate::error::{ServerError, ServerResult};
use crate::version_backend::{ClientOrdinals, VersionBackend};
use daysync_protocol::{ClientView, Cookie};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Tracks mutation ordinals for every user.
#[derive(Debug, Default)]
pub struct VersionStore {
    users: RwLock<ClientOrdinals>,
    backend: Option<Arc<dyn VersionBackend>>,
}

impl VersionStore {
    /// Creates an empty, memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store backed by `backend`, loading everything it holds.
    pub fn with_backend(backend: Arc<dyn VersionBackend>) -> ServerResult<Self> {
        let users = backend.load()?;
        info!(users = users.len(), "loaded client ordinals");
        Ok(Self {
            users: RwLock::new(users),
            backend: Some(backend),
        })
    }

    /// Returns the last applied mutation id, or 0 for a new client.
    pub fn last_mutation_id(&self, user_id: &str, client_id: &str) -> u64 {
        self.users
            .read()
            .get(user_id)
            .and_then(|clients| clients.get(client_id).copied())
            .unwrap_or(0)
    }

    /// Records `new_id` as the client's last applied mutation id.
    ///
    /// Re-recording the current id is a no-op. Moving backwards fails with
    /// [`ServerError::OutOfOrderMutation`] and leaves the store unchanged, as
    /// does a backend write failure.
    pub fn advance(&self, user_id: &str, client_id: &str, new_id: u64) -> ServerResult<()> {
        let mut users = self.users.write();
        let current = users
            .get(user_id)
            .and_then(|clients| clients.get(client_id).copied())
            .unwrap_or(0);

        if new_id < current {
            return Err(ServerError::OutOfOrderMutation {
                client_id: client_id.to_string(),
                current,
                attempted: new_id,
            });
        }
        if new_id == current {
            return Ok(());
        }

        if let Some(backend) = &self.backend {
            backend.record(user_id, client_id, new_id)?;
        }
        users
            .entry(user_id.to_string())
            .or_default()
            .insert(client_id.to_string(), new_id);
        Ok(())
    }

    /// Mints a cookie reflecting the client's current ordinal.
    pub fn make_cookie(&self, user_id: &str, client_id: &str, view: ClientView) -> Cookie {
        Cookie::new(
            self.last_mutation_id(user_id, client_id),
            user_id,
            client_id,
            view.name(),
        )
    }

    /// Returns a snapshot of one user's clients and their ordinals.
    ///
    /// Empty for a user that never advanced.
    pub fn clients(&self, user_id: &str) -> HashMap<String, u64> {
        self.users.read().get(user_id).cloned().unwrap_or_default()
    }

    /// Returns the number of users with at least one recorded client.
    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    /// Returns true if advances are persisted.
    pub fn is_durable(&self) -> bool {
        self.backend.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version_backend::{JsonFileBackend, MemoryBackend};
    use proptest::prelude::*;

    #[test]
    fn unknown_client_is_zero() {
        let store = VersionStore::new();
        assert_eq!(store.last_mutation_id("u1", "c1"), 0);
        assert!(store.clients("u1").is_empty());
    }

    #[test]
    fn advance_and_read() {
        let store = VersionStore::new();
        store.advance("u1", "c1", 3).unwrap();

        assert_eq!(store.last_mutation_id("u1", "c1"), 3);
        assert_eq!(store.last_mutation_id("u1", "c2"), 0);
        assert_eq!(store.last_mutation_id("u2", "c1"), 0);
        assert_eq!(store.user_count(), 1);

        store.advance("u1", "c2", 1).unwrap();
        let clients = store.clients("u1");
        assert_eq!(clients.len(), 2);
        assert_eq!(clients["c1"], 3);
        assert_eq!(clients["c2"], 1);
    }

    #[test]
    fn same_id_is_idempotent() {
        let store = VersionStore::new();
        store.advance("u1", "c1", 2).unwrap();
        store.advance("u1", "c1", 2).unwrap();
        assert_eq!(store.last_mutation_id("u1", "c1"), 2);

        // Zero on an unknown client does not create an entry.
        store.advance("u9", "c1", 0).unwrap();
        assert!(store.clients("u9").is_empty());
        assert_eq!(store.user_count(), 1);
    }

    #[test]
    fn backwards_is_rejected() {
        let store = VersionStore::new();
        store.advance("u1", "c1", 5).unwrap();

        let err = store.advance("u1", "c1", 4).unwrap_err();
        assert!(matches!(
            err,
            ServerError::OutOfOrderMutation {
                current: 5,
                attempted: 4,
                ..
            }
        ));
        assert_eq!(store.last_mutation_id("u1", "c1"), 5);
    }

    #[test]
    fn cookie_reflects_store() {
        let store = VersionStore::new();
        store.advance("u1", "c1", 7).unwrap();

        let cookie = store.make_cookie("u1", "c1", ClientView::Todo);
        assert_eq!(cookie.last_mutation_id, 7);
        assert_eq!(cookie.client_view, "todo-replicache-flat");
        assert_eq!(cookie.user_id, "u1");
    }

    #[test]
    fn restart_restores_ordinals() {
        let backend = MemoryBackend::new();
        let store = VersionStore::with_backend(Arc::new(backend.clone())).unwrap();
        assert!(store.is_durable());
        store.advance("u1", "c1", 3).unwrap();
        store.advance("u1", "c2", 1).unwrap();
        drop(store);

        let restarted = VersionStore::with_backend(Arc::new(backend)).unwrap();
        assert_eq!(restarted.last_mutation_id("u1", "c1"), 3);
        assert_eq!(restarted.last_mutation_id("u1", "c2"), 1);
        assert!(restarted.advance("u1", "c1", 2).is_err());
    }

    #[test]
    fn restart_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.json");

        let store = VersionStore::with_backend(Arc::new(JsonFileBackend::open(&path).unwrap())).unwrap();
        store.advance("u1", "c1", 5).unwrap();
        drop(store);

        let restarted =
            VersionStore::with_backend(Arc::new(JsonFileBackend::open(&path).unwrap())).unwrap();
        assert_eq!(restarted.last_mutation_id("u1", "c1"), 5);
        assert_eq!(restarted.user_count(), 1);
    }

    #[test]
    fn backend_failure_keeps_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone").join("versions.json");
        let store = VersionStore::with_backend(Arc::new(JsonFileBackend::open(&path).unwrap())).unwrap();

        assert!(store.advance("u1", "c1", 1).is_err());
        assert_eq!(store.last_mutation_id("u1", "c1"), 0);
        assert_eq!(store.user_count(), 0);
    }

    proptest! {
        #[test]
        fn ordinal_never_decreases(ids in proptest::collection::vec(0u64..50, 1..40)) {
            let store = VersionStore::new();
            let mut previous = 0;
            for id in ids {
                let result = store.advance("u", "c", id);
                let now = store.last_mutation_id("u", "c");
                prop_assert!(now >= previous);
                prop_assert_eq!(result.is_ok(), id >= previous);
                previous = now;
            }
        }
    }
}
