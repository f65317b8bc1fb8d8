//! Push handling: ordering checks, domain dispatch and ordinal bookkeeping.

use crate::collaborator::CollaboratorTable;
use crate::error::{ServerError, ServerResult};
use crate::notify::NotificationBridge;
use crate::version_store::VersionStore;
use daysync_protocol::{Cookie, LastMutationIdChanges, MutationFailure, MutationRecord, PushResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Outcome of one push batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResult {
    /// Clients whose ordinal advanced. Empty iff the cookie's ordinal did not move.
    pub last_mutation_id_changes: LastMutationIdChanges,
    /// Cookie reflecting the state after the batch.
    pub cookie: Cookie,
    /// The mutation that stopped the batch, if any.
    pub error: Option<MutationFailure>,
}

impl PushResult {
    /// Converts into the wire response.
    pub fn into_response(self) -> PushResponse {
        PushResponse::new(&self.cookie, self.last_mutation_id_changes, self.error)
    }
}

/// Per-user async locks, dropped from the table once nobody holds or waits on them.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    async fn lock(&self, user_id: &str) -> UserLockGuard<'_> {
        let lock = Arc::clone(self.locks.lock().entry(user_id.to_string()).or_default());
        let guard = lock.lock_owned().await;
        UserLockGuard {
            table: self,
            user_id: user_id.to_string(),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct UserLockGuard<'a> {
    table: &'a UserLocks,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.table.locks.lock();
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Applies push batches in order and advances the version store.
pub struct MutationRouter {
    collaborators: CollaboratorTable,
    versions: Arc<VersionStore>,
    bridge: NotificationBridge,
    max_batch: usize,
    locks: UserLocks,
}

impl MutationRouter {
    /// Creates a new router.
    pub fn new(
        collaborators: CollaboratorTable,
        versions: Arc<VersionStore>,
        bridge: NotificationBridge,
        max_batch: usize,
    ) -> Self {
        Self {
            collaborators,
            versions,
            bridge,
            max_batch,
            locks: UserLocks::default(),
        }
    }

    /// Processes one push batch for `client_id`.
    ///
    /// Mutations run in array order. Ids at or below the client's ordinal are
    /// replays and are skipped. A gap anywhere in the batch rejects the whole
    /// batch with [`ServerError::MissingMutation`] before anything is applied.
    /// A domain rejection stops the batch; mutations applied before it stay
    /// committed and the failure is reported in [`PushResult::error`].
    ///
    /// The ordinal advances after every applied mutation, so dropping the
    /// returned future mid-batch leaves the version store consistent with
    /// the collaborator.
    pub async fn push(
        &self,
        user_id: &str,
        view_name: &str,
        client_id: &str,
        mutations: Vec<MutationRecord>,
    ) -> ServerResult<PushResult> {
        let (view, collaborator) = self
            .collaborators
            .resolve(view_name)
            .ok_or_else(|| ServerError::UnknownClientView(view_name.to_string()))?;

        if client_id.is_empty() {
            return Err(ServerError::InvalidRequest("missing client id".into()));
        }
        if mutations.len() > self.max_batch {
            return Err(ServerError::InvalidRequest(format!(
                "Too many mutations: {} > {}",
                mutations.len(),
                self.max_batch
            )));
        }
        if let Some(foreign) = mutations.iter().find(|m| !m.belongs_to(client_id)) {
            return Err(ServerError::InvalidRequest(format!(
                "mutation {} belongs to client {:?}, pushed by {}",
                foreign.mutation_id, foreign.client_id, client_id
            )));
        }

        let guard = self.locks.lock(user_id).await;

        let start = self.versions.last_mutation_id(user_id, client_id);
        check_sequence(client_id, start, &mutations)?;

        let mut applied = start;
        let mut failure = None;
        for mutation in &mutations {
            if mutation.mutation_id <= applied {
                debug!(user_id, client_id, mutation_id = mutation.mutation_id, "skipping replayed mutation");
                continue;
            }
            match collaborator
                .apply_mutation(&mutation.name, &mutation.args, user_id)
                .await
            {
                Ok(()) => {
                    // Recorded before the next await so a cancelled push
                    // never leaves an applied mutation unaccounted for.
                    self.versions.advance(user_id, client_id, mutation.mutation_id)?;
                    applied = mutation.mutation_id;
                }
                Err(e) => {
                    warn!(
                        user_id,
                        client_id,
                        %view,
                        mutation_id = mutation.mutation_id,
                        mutation = %mutation.name,
                        error = %e,
                        "mutation rejected, aborting batch"
                    );
                    failure = Some(MutationFailure {
                        mutation_id: mutation.mutation_id,
                        name: mutation.name.clone(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        let mut changes = LastMutationIdChanges::new();
        if applied > start {
            changes.insert(client_id.to_string(), applied);
        }
        let cookie = self.versions.make_cookie(user_id, client_id, view);
        drop(guard);

        info!(
            user_id,
            client_id,
            %view,
            received = mutations.len(),
            from = start,
            to = applied,
            "push processed"
        );

        if !changes.is_empty() {
            self.bridge.notify(user_id);
        }

        Ok(PushResult {
            last_mutation_id_changes: changes,
            cookie,
            error: failure,
        })
    }

    /// Returns the number of users with a push in flight or waiting.
    pub fn active_user_locks(&self) -> usize {
        self.locks.len()
    }
}

/// Rejects a batch that would skip over a mutation id.
fn check_sequence(client_id: &str, start: u64, mutations: &[MutationRecord]) -> ServerResult<()> {
    let mut expected = start;
    for mutation in mutations {
        if mutation.mutation_id <= expected {
            continue;
        }
        if mutation.mutation_id != expected + 1 {
            return Err(ServerError::MissingMutation {
                client_id: client_id.to_string(),
                expected: expected + 1,
                actual: mutation.mutation_id,
            });
        }
        expected += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{DomainCollaborator, DomainError};
    use crate::registry::ConnectionRegistry;
    use async_trait::async_trait;
    use daysync_protocol::{ClientView, PatchOp, StreamEvent};
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Records applied mutation names; rejects any named `fail`.
    #[derive(Debug, Default)]
    struct Recorder {
        applied: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DomainCollaborator for Recorder {
        async fn apply_mutation(&self, name: &str, _: &Value, _: &str) -> Result<(), DomainError> {
            if name == "fail" {
                return Err(DomainError::Rejected("nope".into()));
            }
            self.applied.lock().push(name.to_string());
            Ok(())
        }

        async fn build_patch(&self, _: &str) -> Result<Vec<PatchOp>, DomainError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        router: MutationRouter,
        recorder: Arc<Recorder>,
        versions: Arc<VersionStore>,
        registry: ConnectionRegistry,
    }

    fn fixture() -> Fixture {
        let recorder = Arc::new(Recorder::default());
        let versions = Arc::new(VersionStore::new());
        let registry = ConnectionRegistry::new(8);
        let table = CollaboratorTable::new().with(ClientView::Todo, recorder.clone());
        let router = MutationRouter::new(
            table,
            Arc::clone(&versions),
            NotificationBridge::new(registry.clone()),
            10,
        );
        Fixture {
            router,
            recorder,
            versions,
            registry,
        }
    }

    fn batch(ids: &[(u64, &str)]) -> Vec<MutationRecord> {
        ids.iter()
            .map(|(id, name)| MutationRecord::new(*id, *name, json!({})))
            .collect()
    }

    const TODO: &str = "todo-replicache-flat";

    /// Suspends for 50 ms per mutation and treats names as creates: a name
    /// seen twice is rejected.
    #[derive(Debug, Default)]
    struct Slow {
        applied: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DomainCollaborator for Slow {
        async fn apply_mutation(&self, name: &str, _: &Value, _: &str) -> Result<(), DomainError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut applied = self.applied.lock();
            if applied.iter().any(|seen| seen == name) {
                return Err(DomainError::Rejected(format!("{name} already exists")));
            }
            applied.push(name.to_string());
            Ok(())
        }

        async fn build_patch(&self, _: &str) -> Result<Vec<PatchOp>, DomainError> {
            Ok(Vec::new())
        }
    }

    fn slow_router() -> (Arc<MutationRouter>, Arc<Slow>, Arc<VersionStore>) {
        let slow = Arc::new(Slow::default());
        let versions = Arc::new(VersionStore::new());
        let table = CollaboratorTable::new().with(ClientView::Todo, slow.clone());
        let router = MutationRouter::new(
            table,
            Arc::clone(&versions),
            NotificationBridge::new(ConnectionRegistry::new(8)),
            10,
        );
        (Arc::new(router), slow, versions)
    }

    #[test]
    fn sequence_check() {
        assert!(check_sequence("c", 0, &batch(&[(1, "a"), (2, "b")])).is_ok());
        assert!(check_sequence("c", 3, &batch(&[(2, "a"), (3, "b"), (4, "c")])).is_ok());
        let err = check_sequence("c", 0, &batch(&[(1, "a"), (3, "b")])).unwrap_err();
        assert!(matches!(
            err,
            ServerError::MissingMutation {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn applies_in_order_and_advances() {
        let f = fixture();
        let mut stream = f.registry.register("u1").unwrap();
        assert_eq!(stream.try_recv(), Some(StreamEvent::Connected));

        let result = f
            .router
            .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b"), (3, "c")]))
            .await
            .unwrap();

        assert_eq!(result.cookie.last_mutation_id, 3);
        assert_eq!(result.last_mutation_id_changes.get("c1"), Some(&3));
        assert!(result.error.is_none());
        assert_eq!(*f.recorder.applied.lock(), vec!["a", "b", "c"]);
        assert_eq!(stream.try_recv(), Some(StreamEvent::Sync));
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn replay_is_a_no_op() {
        let f = fixture();
        let first = f
            .router
            .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b")]))
            .await
            .unwrap();
        let second = f
            .router
            .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b")]))
            .await
            .unwrap();

        assert!(second.last_mutation_id_changes.is_empty());
        assert_eq!(second.cookie, first.cookie);
        assert_eq!(f.recorder.applied.lock().len(), 2);
    }

    #[tokio::test]
    async fn gap_rejects_whole_batch() {
        let f = fixture();
        let mut stream = f.registry.register("u1").unwrap();
        stream.try_recv();

        let err = f
            .router
            .push("u1", TODO, "c1", batch(&[(2, "a")]))
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::MissingMutation { expected: 1, actual: 2, .. }));
        assert_eq!(f.versions.last_mutation_id("u1", "c1"), 0);
        assert!(f.recorder.applied.lock().is_empty());
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn gap_after_valid_prefix_applies_nothing() {
        let f = fixture();
        let err = f
            .router
            .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b"), (4, "d")]))
            .await
            .unwrap_err();

        assert!(err.requires_resync());
        assert!(f.recorder.applied.lock().is_empty());
        assert_eq!(f.versions.last_mutation_id("u1", "c1"), 0);
    }

    #[tokio::test]
    async fn domain_failure_keeps_prefix() {
        let f = fixture();
        let result = f
            .router
            .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "fail"), (3, "c")]))
            .await
            .unwrap();

        assert_eq!(result.cookie.last_mutation_id, 1);
        assert_eq!(result.last_mutation_id_changes.get("c1"), Some(&1));
        let failure = result.error.unwrap();
        assert_eq!(failure.mutation_id, 2);
        assert_eq!(failure.name, "fail");
        assert_eq!(*f.recorder.applied.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn first_mutation_failing_changes_nothing() {
        let f = fixture();
        let mut stream = f.registry.register("u1").unwrap();
        stream.try_recv();

        let result = f
            .router
            .push("u1", TODO, "c1", batch(&[(1, "fail"), (2, "b")]))
            .await
            .unwrap();

        assert!(result.last_mutation_id_changes.is_empty());
        assert_eq!(result.cookie.last_mutation_id, 0);
        assert!(result.error.is_some());
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn request_validation() {
        let f = fixture();

        let err = f.router.push("u1", "unknown-client", "c1", vec![]).await.unwrap_err();
        assert!(matches!(err, ServerError::UnknownClientView(_)));

        let err = f.router.push("u1", "ideas-replicache", "c1", vec![]).await.unwrap_err();
        assert!(matches!(err, ServerError::UnknownClientView(_)));

        let too_many: Vec<_> = (1..=11).map(|i| MutationRecord::new(i, "a", json!({}))).collect();
        let err = f.router.push("u1", TODO, "c1", too_many).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));

        let foreign = vec![MutationRecord::new(1, "a", json!({})).with_client_id("c2")];
        let err = f.router.push("u1", TODO, "c1", foreign).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));

        let err = f.router.push("u1", TODO, "", vec![]).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn empty_batch_reports_no_changes() {
        let f = fixture();
        let result = f.router.push("u1", TODO, "c1", vec![]).await.unwrap();

        assert!(result.last_mutation_id_changes.is_empty());
        assert_eq!(result.cookie.last_mutation_id, 0);
    }

    #[tokio::test]
    async fn lock_table_is_pruned() {
        let f = fixture();
        f.router.push("u1", TODO, "c1", batch(&[(1, "a")])).await.unwrap();
        f.router.push("u2", TODO, "c1", batch(&[(1, "a")])).await.unwrap();
        assert_eq!(f.router.active_user_locks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_push_keeps_applied_prefix() {
        let (router, slow, versions) = slow_router();

        // Cancelled while the second mutation is in flight.
        let push = router.push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b")]));
        assert!(tokio::time::timeout(Duration::from_millis(75), push).await.is_err());

        assert_eq!(*slow.applied.lock(), vec!["a"]);
        assert_eq!(versions.last_mutation_id("u1", "c1"), 1);
        assert_eq!(router.active_user_locks(), 0);

        let retry = router
            .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b")]))
            .await
            .unwrap();
        assert!(retry.error.is_none());
        assert_eq!(retry.cookie.last_mutation_id, 2);
        assert_eq!(retry.last_mutation_id_changes.get("c1"), Some(&2));
        assert_eq!(*slow.applied.lock(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_batches_apply_once() {
        let (router, slow, versions) = slow_router();

        let pushes: Vec<_> = (0..6)
            .map(|_| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    router
                        .push("u1", TODO, "c1", batch(&[(1, "a"), (2, "b"), (3, "c")]))
                        .await
                })
            })
            .collect();

        let mut advanced = 0;
        for push in pushes {
            let result = push.await.unwrap().unwrap();
            assert!(result.error.is_none());
            assert_eq!(result.cookie.last_mutation_id, 3);
            if !result.last_mutation_id_changes.is_empty() {
                advanced += 1;
            }
        }

        assert_eq!(advanced, 1);
        assert_eq!(*slow.applied.lock(), vec!["a", "b", "c"]);
        assert_eq!(versions.last_mutation_id("u1", "c1"), 3);
    }
}
