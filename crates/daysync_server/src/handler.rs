//! Request handlers for sync endpoints.

use crate::auth::Authenticator;
use crate::collaborator::CollaboratorTable;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::notify::NotificationBridge;
use crate::patch::PatchGenerator;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::router::MutationRouter;
use crate::version_store::VersionStore;
use daysync_protocol::{Cookie, PokeResponse, PullRequest, PullResponse, PushRequest, PushResponse};
use std::sync::Arc;
use tracing::debug;

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Mutation ordinals (shared across all handlers).
    pub versions: Arc<VersionStore>,
    /// Open live update streams.
    pub registry: ConnectionRegistry,
    /// Resolves the calling user.
    pub authenticator: Authenticator,
}

impl HandlerContext {
    /// Creates a new handler context around an existing version store.
    pub fn new(config: ServerConfig, authenticator: Authenticator, versions: Arc<VersionStore>) -> Self {
        let registry = ConnectionRegistry::new(config.stream_queue_capacity);
        Self {
            config,
            versions,
            registry,
            authenticator,
        }
    }
}

/// Handler for sync requests.
///
/// All methods take an already authenticated user id.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
    router: MutationRouter,
    patches: PatchGenerator,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>, collaborators: CollaboratorTable) -> Self {
        let bridge = NotificationBridge::new(context.registry.clone());
        let router = MutationRouter::new(
            collaborators.clone(),
            Arc::clone(&context.versions),
            bridge,
            context.config.max_push_batch,
        );
        let patches = PatchGenerator::new(collaborators, Arc::clone(&context.versions));

        Self {
            context,
            router,
            patches,
        }
    }

    /// Handles a pull request.
    ///
    /// An undecodable cookie is treated as absent, which forces a full resync.
    pub async fn handle_pull(&self, user_id: &str, request: PullRequest) -> ServerResult<PullResponse> {
        let cookie = request.cookie.as_deref().and_then(|raw| match Cookie::decode(raw) {
            Ok(cookie) => Some(cookie),
            Err(e) => {
                debug!(user_id, client_id = %request.client_id, error = %e, "discarding client cookie");
                None
            }
        });

        let result = self
            .patches
            .pull(user_id, &request.client_view.name, &request.client_id, cookie)
            .await?;
        Ok(result.into_response())
    }

    /// Handles a push request.
    pub async fn handle_push(&self, user_id: &str, request: PushRequest) -> ServerResult<PushResponse> {
        let result = self
            .router
            .push(
                user_id,
                &request.client_view.name,
                &request.client_id,
                request.mutations,
            )
            .await?;
        Ok(result.into_response())
    }

    /// Wakes every stream of `user_id` without a preceding mutation.
    pub fn handle_poke(&self, user_id: &str) -> PokeResponse {
        PokeResponse {
            clients_notified: self.context.registry.wake(user_id),
        }
    }

    /// Opens a live update stream for `user_id`.
    pub fn open_stream(&self, user_id: &str) -> ServerResult<ConnectionHandle> {
        Ok(self.context.registry.register(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{DomainCollaborator, DomainError};
    use crate::error::ServerError;
    use async_trait::async_trait;
    use daysync_protocol::{ClientView, MutationRecord, PatchOp, StreamEvent};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Keeps the last `title` argument seen per user.
    #[derive(Debug, Default)]
    struct Notes {
        titles: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DomainCollaborator for Notes {
        async fn apply_mutation(&self, _: &str, args: &Value, user_id: &str) -> Result<(), DomainError> {
            let title = args["title"].as_str().unwrap_or_default().to_string();
            self.titles.lock().push((user_id.to_string(), title));
            Ok(())
        }

        async fn build_patch(&self, user_id: &str) -> Result<Vec<PatchOp>, DomainError> {
            Ok(self
                .titles
                .lock()
                .iter()
                .filter(|(user, _)| user == user_id)
                .enumerate()
                .map(|(i, (_, title))| PatchOp::upsert(format!("idea/{i}"), json!({ "title": title })))
                .collect())
        }
    }

    const IDEAS: &str = "ideas-replicache";

    fn create_handler() -> (RequestHandler, Arc<HandlerContext>) {
        let context = Arc::new(HandlerContext::new(
            ServerConfig::default(),
            Authenticator::Disabled,
            Arc::new(VersionStore::new()),
        ));
        let table = CollaboratorTable::new().with(ClientView::Ideas, Arc::new(Notes::default()));
        (RequestHandler::new(Arc::clone(&context), table), context)
    }

    fn create_idea(id: u64, title: &str) -> MutationRecord {
        MutationRecord::new(id, "createIdea", json!({ "title": title }))
    }

    #[tokio::test]
    async fn push_and_pull() {
        let (handler, _) = create_handler();

        let push = PushRequest::new(IDEAS, "c1", vec![create_idea(1, "a"), create_idea(2, "b")]);
        let response = handler.handle_push("u1", push).await.unwrap();
        assert_eq!(response.last_mutation_id_changes.get("c1"), Some(&2));

        let pull = PullRequest::new(IDEAS, "c1", None);
        let response = handler.handle_pull("u1", pull).await.unwrap();
        assert_eq!(response.last_mutation_id, 2);
        assert_eq!(response.patch.len(), 2);

        // Other users see nothing.
        let response = handler
            .handle_pull("u2", PullRequest::new(IDEAS, "c1", None))
            .await
            .unwrap();
        assert!(response.patch.is_empty());
        assert_eq!(response.last_mutation_id, 0);
    }

    #[tokio::test]
    async fn garbage_cookie_forces_resync() {
        let (handler, context) = create_handler();
        context.versions.advance("u1", "c1", 3).unwrap();

        let mut pull = PullRequest::new(IDEAS, "c1", None);
        pull.cookie = Some("not a cookie".into());
        let response = handler.handle_pull("u1", pull).await.unwrap();

        assert_eq!(response.last_mutation_id_changes.get("c1"), Some(&3));
    }

    #[tokio::test]
    async fn pull_with_current_cookie_reports_no_changes() {
        let (handler, _) = create_handler();
        handler
            .handle_push("u1", PushRequest::new(IDEAS, "c1", vec![create_idea(1, "a")]))
            .await
            .unwrap();

        let first = handler
            .handle_pull("u1", PullRequest::new(IDEAS, "c1", None))
            .await
            .unwrap();
        let cookie = Cookie::decode(&first.cookie).unwrap();
        let second = handler
            .handle_pull("u1", PullRequest::new(IDEAS, "c1", Some(&cookie)))
            .await
            .unwrap();

        assert!(second.last_mutation_id_changes.is_empty());
        assert_eq!(second.last_mutation_id, 1);
    }

    #[tokio::test]
    async fn push_missing_mutation() {
        let (handler, _) = create_handler();
        let push = PushRequest::new(IDEAS, "c1", vec![create_idea(2, "late")]);

        let err = handler.handle_push("u1", push).await.unwrap_err();
        assert!(matches!(err, ServerError::MissingMutation { .. }));
    }

    #[tokio::test]
    async fn poke_and_stream() {
        let (handler, _) = create_handler();
        let mut stream = handler.open_stream("u1").unwrap();
        assert_eq!(stream.recv().await, Some(StreamEvent::Connected));

        assert_eq!(handler.handle_poke("u1").clients_notified, 1);
        assert_eq!(handler.handle_poke("u2").clients_notified, 0);
        assert_eq!(stream.recv().await, Some(StreamEvent::Sync));
    }
}
